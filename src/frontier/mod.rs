//! Frontier module: the crawl's work source
//!
//! The controller and its workers only see the [`Frontier`] trait. Workers
//! call [`next`](Frontier::next) for work and hand every item back through
//! [`finished`](Frontier::finished); the controller pauses, unpauses and
//! terminates it as the crawl changes state.
//!
//! [`MemoryFrontier`] is the in-memory implementation used by the binary.

mod journal;
mod memory;

pub use journal::{JournalEntry, RecoverJournal, RECOVER_LOG_NAME};
pub use memory::{MemoryFrontier, FRONTIER_SNAPSHOT_NAME, MAX_DEFERRALS};

use crate::settings::Settings;
use crate::uri::{CandidateUri, CrawlUri};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a frontier
#[derive(Debug, Error)]
pub enum FrontierError {
    /// The frontier was terminated; workers treat this as their exit signal
    #[error("Frontier has ended")]
    Ended,

    #[error("Operation not supported by this frontier: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recover journal error: {0}")]
    Journal(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

/// The work source contract
///
/// Implementations must be safe for many workers calling
/// [`next`](Frontier::next) and [`finished`](Frontier::finished)
/// concurrently.
pub trait Frontier: Send + Sync {
    /// Prepares on-disk state (journals) under the job's logs directory
    fn initialize(&self, _logs_dir: &Path) -> Result<(), FrontierError> {
        Ok(())
    }

    /// Begins handing out work
    fn start(&self);

    /// Waits up to `timeout` for the next item
    ///
    /// # Returns
    ///
    /// * `Ok(Some(CrawlUri))` - An item the caller now owns until it calls
    ///   [`finished`](Frontier::finished)
    /// * `Ok(None)` - Nothing ready in time, or the frontier is paused
    /// * `Err(FrontierError::Ended)` - The frontier was terminated
    fn next(&self, timeout: Duration) -> Result<Option<CrawlUri>, FrontierError>;

    /// Takes back an item obtained from [`next`](Frontier::next)
    fn finished(&self, curi: CrawlUri) -> Result<(), FrontierError>;

    /// Queues a discovered URI; returns false if it was already known
    fn schedule(&self, candidate: CandidateUri) -> Result<bool, FrontierError>;

    fn pause(&self);

    fn unpause(&self);

    /// Ends the frontier; blocked and future `next` calls fail with `Ended`
    fn terminate(&self);

    /// True when nothing is queued, waiting, or in flight
    fn is_empty(&self) -> bool;

    fn queued_uri_count(&self) -> u64;

    fn finished_uri_count(&self) -> u64;

    fn succeeded_fetch_count(&self) -> u64;

    fn failed_fetch_count(&self) -> u64;

    fn disregarded_uri_count(&self) -> u64;

    /// Content bytes of successfully fetched items
    fn total_bytes(&self) -> u64;

    /// Every URI ever scheduled
    fn discovered_uri_count(&self) -> u64;

    /// Schedules the crawl's seeds; returns how many were queued
    fn load_seeds(&self) -> Result<usize, FrontierError>;

    /// Re-creates queue state from a recover journal
    fn import_recover_log(
        &self,
        _path: &Path,
        _retain_failures: bool,
    ) -> Result<usize, FrontierError> {
        Err(FrontierError::Unsupported("import_recover_log"))
    }

    /// Writes the frontier's state into checkpoint directory `dir`
    fn checkpoint(&self, dir: &Path) -> Result<(), FrontierError>;

    /// Restores state written by [`checkpoint`](Frontier::checkpoint)
    fn recover(&self, dir: &Path) -> Result<(), FrontierError>;

    fn final_tasks(&self) {}

    fn kick_update(&self, _settings: &dyn Settings) {}

    fn report(&self) -> String;
}
