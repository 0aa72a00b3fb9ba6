//! Crawl status listeners
//!
//! Listeners are called synchronously, in registration order, while the
//! controller holds its listener lock. Callbacks must return quickly and
//! must not call back into the controller's state-changing methods.

use crate::state::CrawlState;
use std::io;
use std::path::Path;

/// Observer of crawl lifecycle events
pub trait CrawlStatusListener: Send + Sync {
    fn crawl_started(&self, _message: &str) {}

    fn crawl_pausing(&self, _message: &str) {}

    fn crawl_paused(&self, _message: &str) {}

    fn crawl_resuming(&self, _message: &str) {}

    /// The crawl is stopping; `message` is the exit reason
    fn crawl_ending(&self, _message: &str) {}

    /// The crawl has finished; `message` is the exit reason
    fn crawl_ended(&self, _message: &str) {}

    /// Writes the listener's own state into checkpoint directory `dir`
    ///
    /// An error aborts the checkpoint.
    fn crawl_checkpoint(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Routes a state change to the matching listener callback
pub(crate) fn dispatch(listener: &dyn CrawlStatusListener, state: CrawlState, message: &str) {
    match state {
        CrawlState::Started => listener.crawl_started(message),
        CrawlState::Pausing => listener.crawl_pausing(message),
        CrawlState::Paused => listener.crawl_paused(message),
        CrawlState::Running => listener.crawl_resuming(message),
        CrawlState::Stopping => listener.crawl_ending(message),
        CrawlState::Finished => listener.crawl_ended(message),
        CrawlState::Nascent | CrawlState::Preparing | CrawlState::Checkpointing => {}
    }
}

/// Listener writing every event to the diagnostic log
#[derive(Debug, Default)]
pub struct LoggingListener;

impl CrawlStatusListener for LoggingListener {
    fn crawl_started(&self, message: &str) {
        tracing::info!("Crawl started: {}", message);
    }

    fn crawl_pausing(&self, message: &str) {
        tracing::info!("Crawl pausing: {}", message);
    }

    fn crawl_paused(&self, message: &str) {
        tracing::info!("Crawl paused: {}", message);
    }

    fn crawl_resuming(&self, message: &str) {
        tracing::info!("Crawl running: {}", message);
    }

    fn crawl_ending(&self, message: &str) {
        tracing::info!("Crawl ending: {}", message);
    }

    fn crawl_ended(&self, message: &str) {
        tracing::info!("Crawl ended: {}", message);
    }

    fn crawl_checkpoint(&self, dir: &Path) -> io::Result<()> {
        tracing::info!("Checkpointing into {}", dir.display());
        Ok(())
    }
}
