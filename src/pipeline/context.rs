use crate::config::CrawlOrder;
use crate::crawler::CrawlLogs;
use crate::frontier::Frontier;
use crate::pipeline::processor::ProcessorError;
use crate::server::ServerCache;
use crate::settings::Settings;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

/// What a stage can reach of the running crawl
///
/// Built by the controller once per worker; holds shared handles to the
/// crawl's global collaborators.
#[derive(Clone)]
pub struct ProcessorContext {
    order: Arc<CrawlOrder>,
    settings: Arc<dyn Settings>,
    frontier: Arc<dyn Frontier>,
    server_cache: Arc<ServerCache>,
    logs: Arc<CrawlLogs>,
    runtime: Handle,
    post_chain: usize,
    serial: Option<u32>,
    interrupted: Arc<AtomicBool>,
}

impl ProcessorContext {
    pub fn new(
        order: Arc<CrawlOrder>,
        settings: Arc<dyn Settings>,
        frontier: Arc<dyn Frontier>,
        server_cache: Arc<ServerCache>,
        logs: Arc<CrawlLogs>,
        runtime: Handle,
        post_chain: usize,
    ) -> Self {
        Self {
            order,
            settings,
            frontier,
            server_cache,
            logs,
            runtime,
            post_chain,
            serial: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A copy bound to worker `serial` and its interrupt flag
    pub fn for_worker(&self, serial: u32, interrupted: Arc<AtomicBool>) -> Self {
        let mut ctx = self.clone();
        ctx.serial = Some(serial);
        ctx.interrupted = interrupted;
        ctx
    }

    pub fn order(&self) -> &CrawlOrder {
        &self.order
    }

    pub fn settings(&self) -> &dyn Settings {
        self.settings.as_ref()
    }

    pub fn frontier(&self) -> &Arc<dyn Frontier> {
        &self.frontier
    }

    pub fn server_cache(&self) -> &ServerCache {
        &self.server_cache
    }

    pub fn logs(&self) -> &CrawlLogs {
        &self.logs
    }

    /// Handle of the crawl's async runtime
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Index of the post-processing chain
    pub fn post_chain(&self) -> usize {
        self.post_chain
    }

    /// Serial number of the worker this context belongs to
    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    /// Fails with `Interrupted` once the owning worker has been killed
    pub fn check_for_interrupt(&self) -> Result<(), ProcessorError> {
        if self.interrupted.load(Ordering::Acquire) {
            Err(ProcessorError::Interrupted)
        } else {
            Ok(())
        }
    }
}
