//! The crawl controller and its worker pool
//!
//! This module contains the concurrency core of a crawl:
//! - The controller's state machine (start, pause, checkpoint, stop)
//! - The pool of worker ("toe") threads and their processing loop
//! - Single-thread emergency mode
//! - Status listeners, crawl logs, progress statistics and reports

mod checkpoint;
mod controller;
mod gate;
mod listener;
mod logs;
mod report;
mod runtime;
mod stats;
mod toe_pool;
mod toe_thread;

pub use checkpoint::{
    checkpoint_name, list_checkpoints, Checkpointer, ControllerSnapshot, InProgressCheckpoint,
    CONTROLLER_SNAPSHOT_NAME, IN_PROGRESS_SUFFIX, ROTATION_MARKER_NAME,
};
pub use controller::{CrawlController, REPORT_NAMES, RESERVE_MEMORY_BYTES};
pub use gate::ContinueGate;
pub use listener::{CrawlStatusListener, LoggingListener};
pub use logs::{CrawlLogs, CRAWL_LOG, PROGRESS_LOG, RUNTIME_ERRORS_LOG, URI_ERRORS_LOG};
pub use report::{format_elapsed, Manifest, ManifestKind};
pub use stats::{ProgressSnapshot, StatisticsTracker, PROGRESS_LEGEND};
pub use toe_pool::ToePool;
pub use toe_thread::{Step, ToeThread};
