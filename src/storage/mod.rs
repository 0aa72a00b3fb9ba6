//! Storage module for the crawl's page store
//!
//! The page store is a SQLite database in the job's state directory. The
//! page-writer stage records one row per fetched URI in it; the CLI's
//! `--stats` report reads it back, and checkpoints carry a snapshot of it.

mod schema;
mod sqlite;

pub use schema::{initialize_schema, SCHEMA_VERSION};
pub use sqlite::PageStore;

use crate::config::CrawlOrder;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the page store, in the state directory and in checkpoints
pub const PAGE_STORE_NAME: &str = "pages.db";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page store not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Location of the page store for `order`
pub fn page_store_path(order: &CrawlOrder) -> PathBuf {
    order.state_dir().join(PAGE_STORE_NAME)
}

/// Copies the page store at `source` into `target`
///
/// # Returns
///
/// * `Ok(true)` - The snapshot was written
/// * `Ok(false)` - There is no page store yet
pub fn snapshot_page_store(source: &Path, target: &Path) -> StorageResult<bool> {
    if !source.exists() {
        return Ok(false);
    }
    let store = PageStore::open_existing(source)?;
    store.snapshot_into(target)?;
    Ok(true)
}

/// One row of the page store
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub uri: String,
    pub host: String,
    pub fetch_status: i32,
    pub content_type: Option<String>,
    pub content_length: u64,
    pub content_digest: Option<String>,
    pub path_from_seed: String,
    pub via: Option<String>,
    pub outlinks: u64,
    pub fetch_attempts: u32,
    pub thread: Option<u32>,
    pub written_at: String,
}

/// Aggregate numbers over the page store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageStats {
    pub pages: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_bytes: u64,
    pub hosts: u64,
    /// Page count per fetch status, most common first
    pub by_status: Vec<(i32, u64)>,
    /// Page count per host, most common first
    pub top_hosts: Vec<(String, u64)>,
    /// Page count per content type, most common first
    pub by_content_type: Vec<(String, u64)>,
}
