//! Job status strings passed to crawl status listeners and recorded as the
//! crawl's exit reason.

pub const PREPARING: &str = "Preparing";
pub const PENDING: &str = "Pending";
pub const RUNNING: &str = "Running";
pub const WAITING_FOR_PAUSE: &str = "Pausing - Waiting for threads to finish";
pub const PAUSED: &str = "Paused";
pub const CHECKPOINTING: &str = "Checkpointing";

/// Ended by an operator request
pub const ABORTED: &str = "Finished - Ended by operator";
/// Default exit reason until a proper exit replaces it
pub const FINISHED_ABNORMAL: &str = "Finished - Abnormal exit from crawling";
/// Frontier exhausted
pub const FINISHED: &str = "Finished";
pub const FINISHED_TIME_LIMIT: &str = "Finished - Timelimit hit";
pub const FINISHED_DATA_LIMIT: &str = "Finished - Maximum amount of data limit hit";
pub const FINISHED_DOCUMENT_LIMIT: &str = "Finished - Maximum number of documents limit hit";
