use std::io;
use std::thread;
use tokio::runtime::{Builder, Handle, Runtime};

const RUNTIME_WORKERS: usize = 2;

/// The controller's async runtime
///
/// Hosts the progress reporting task and the HTTP work that workers drive
/// through [`Handle::block_on`]. Dropping it shuts the runtime down without
/// waiting for outstanding tasks, from a helper thread when dropped inside
/// an async context (where a runtime may not be dropped).
pub(crate) struct CrawlRuntime {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl CrawlRuntime {
    pub(crate) fn new() -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKERS)
            .thread_name("crawl-runtime")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for CrawlRuntime {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if Handle::try_current().is_ok() {
            let spawned = thread::Builder::new()
                .name("crawl-runtime-shutdown".to_string())
                .spawn(move || runtime.shutdown_background());
            if let Err(e) = spawned {
                tracing::warn!("Failed to spawn runtime shutdown thread: {}", e);
            }
        } else {
            runtime.shutdown_background();
        }
    }
}
