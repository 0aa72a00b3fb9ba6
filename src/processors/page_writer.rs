//! Page store writer
//!
//! SQLite connections cannot be shared between threads, so each worker
//! gets its own [`WorkerPageWriter`] holding a private connection to the
//! job's page store. The shared [`PageWriter`] only knows where the store
//! lives.

use crate::config::CrawlOrder;
use crate::pipeline::{Processor, ProcessorContext, ProcessorError};
use crate::storage::{page_store_path, PageStore};
use crate::uri::fetch_status::S_UNATTEMPTED;
use crate::uri::CrawlUri;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hex SHA-256 of a response body
pub fn content_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

pub struct PageWriter {
    name: String,
    path: PathBuf,
    crawl_name: String,
    /// Rows written by every worker's instance
    written: Arc<AtomicU64>,
}

impl PageWriter {
    pub fn new(name: &str, order: &CrawlOrder) -> Self {
        Self {
            name: name.to_string(),
            path: page_store_path(order),
            crawl_name: order.crawl.name.clone(),
            written: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Processor for PageWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn inner_process(
        &self,
        _ctx: &ProcessorContext,
        _curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        Err(ProcessorError::Runtime(format!(
            "{} must run through a worker's own instance",
            self.name
        )))
    }

    fn report(&self) -> String {
        format!(
            "Processor: {}\n  Page store: {}\n  Pages written: {}\n",
            self.name,
            self.path.display(),
            self.written.load(Ordering::Relaxed)
        )
    }

    fn instance_per_worker(&self) -> bool {
        true
    }

    fn create_worker_local_instance(
        &self,
        serial: u32,
    ) -> Result<Box<dyn Processor>, ProcessorError> {
        let store = PageStore::open(&self.path)?;
        store.set_info("crawl-name", &self.crawl_name)?;
        tracing::debug!("{} #{} opened {}", self.name, serial, self.path.display());
        Ok(Box::new(WorkerPageWriter {
            name: self.name.clone(),
            store,
            written: Arc::clone(&self.written),
        }))
    }
}

/// One worker's page writer
pub struct WorkerPageWriter {
    name: String,
    store: PageStore,
    written: Arc<AtomicU64>,
}

impl Processor for WorkerPageWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn inner_process(
        &self,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        if curi.fetch_status() == S_UNATTEMPTED {
            return Ok(());
        }
        // a killed worker's item is already back in the frontier
        ctx.check_for_interrupt()?;
        let digest = curi.body().map(content_digest);
        self.store.record_page(curi, digest.as_deref())?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::Harness;
    use url::Url;

    #[test]
    fn test_content_digest() {
        assert_eq!(
            content_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_shared_instance_refuses_to_write() {
        let harness = Harness::new("");
        let writer = PageWriter::new("page-writer", harness.ctx.order());
        assert!(writer.instance_per_worker());
        let mut curi = CrawlUri::new(Url::parse("http://example.com/").unwrap());
        assert!(writer.inner_process(&harness.ctx, &mut curi).is_err());
    }

    #[test]
    fn test_worker_instances_share_the_store() {
        let harness = Harness::new("");
        let writer = PageWriter::new("page-writer", harness.ctx.order());
        let first = writer.create_worker_local_instance(1).unwrap();
        let second = writer.create_worker_local_instance(2).unwrap();

        let mut page = CrawlUri::new(Url::parse("http://example.com/a").unwrap());
        page.set_fetch_status(200);
        page.set_body(Some(b"abc".to_vec()));
        page.set_content_length(3);
        first.inner_process(&harness.ctx, &mut page).unwrap();

        let mut missing = CrawlUri::new(Url::parse("http://example.com/b").unwrap());
        missing.set_fetch_status(404);
        second.inner_process(&harness.ctx, &mut missing).unwrap();

        let mut unattempted = CrawlUri::new(Url::parse("http://example.com/c").unwrap());
        second.inner_process(&harness.ctx, &mut unattempted).unwrap();

        drop(first);
        drop(second);
        let store = PageStore::open(writer.path()).unwrap();
        assert_eq!(store.count_pages().unwrap(), 2);
        assert_eq!(store.info("crawl-name").unwrap().as_deref(), Some("stage-test"));
        let record = store.page("http://example.com/a").unwrap().unwrap();
        assert_eq!(record.content_digest.as_deref(), Some(&content_digest(b"abc")[..]));
        assert!(writer.report().contains("Pages written: 2"));
    }

    #[test]
    fn test_interrupted_worker_writes_nothing() {
        let harness = Harness::new("");
        let writer = PageWriter::new("page-writer", harness.ctx.order());
        let local = writer.create_worker_local_instance(1).unwrap();
        let interrupted = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let ctx = harness.ctx.for_worker(1, interrupted);

        let mut page = CrawlUri::new(Url::parse("http://example.com/a").unwrap());
        page.set_fetch_status(200);
        assert!(matches!(
            local.inner_process(&ctx, &mut page),
            Err(ProcessorError::Interrupted)
        ));
        drop(local);
        assert_eq!(PageStore::open(writer.path()).unwrap().count_pages().unwrap(), 0);
    }
}
