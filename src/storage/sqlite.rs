//! SQLite page store
//!
//! Every page-writer instance owns its own `PageStore`, so connections are
//! never shared between worker threads. WAL mode plus a busy timeout lets
//! the writers and the checkpoint snapshot coexist on one file.

use crate::storage::schema::initialize_schema;
use crate::storage::{PageRecord, PageStats, StorageError, StorageResult};
use crate::uri::fetch_status;
use crate::uri::CrawlUri;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const TOP_LIMIT: usize = 10;

/// Connection to the page store
pub struct PageStore {
    conn: Connection,
}

impl PageStore {
    /// Opens (creating if needed) the page store at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(PageStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // Configure SQLite for concurrent writers
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Opens an existing page store without creating one
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Err(StorageError::NotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    // ===== Store info =====

    pub fn set_info(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO store_info (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn info(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM store_info WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    // ===== Pages =====

    /// Records the outcome of fetching `curi`, replacing any earlier row
    pub fn record_page(&self, curi: &CrawlUri, digest: Option<&str>) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO pages (uri, host, fetch_status, content_type, content_length,
             content_digest, path_from_seed, via, outlinks, fetch_attempts, thread, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(uri) DO UPDATE SET
                fetch_status = excluded.fetch_status,
                content_type = excluded.content_type,
                content_length = excluded.content_length,
                content_digest = excluded.content_digest,
                outlinks = excluded.outlinks,
                fetch_attempts = excluded.fetch_attempts,
                thread = excluded.thread,
                written_at = excluded.written_at",
            params![
                curi.uri().as_str(),
                curi.host(),
                curi.fetch_status(),
                curi.content_type(),
                curi.content_length() as i64,
                digest,
                curi.path_from_seed(),
                curi.via().map(|v| v.as_str()),
                curi.outlinks().len() as i64,
                curi.fetch_attempts(),
                curi.thread_number(),
                now
            ],
        )?;
        Ok(())
    }

    pub fn page(&self, uri: &str) -> StorageResult<Option<PageRecord>> {
        let page = self
            .conn
            .query_row(
                "SELECT uri, host, fetch_status, content_type, content_length, content_digest,
                 path_from_seed, via, outlinks, fetch_attempts, thread, written_at
                 FROM pages WHERE uri = ?1",
                params![uri],
                page_from_row,
            )
            .optional()?;
        Ok(page)
    }

    pub fn pages_for_host(&self, host: &str) -> StorageResult<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT uri, host, fetch_status, content_type, content_length, content_digest,
             path_from_seed, via, outlinks, fetch_attempts, thread, written_at
             FROM pages WHERE host = ?1 ORDER BY id",
        )?;
        let pages = stmt
            .query_map(params![host], page_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    pub fn count_pages(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Statistics =====

    /// Aggregates over every recorded page
    pub fn stats(&self) -> StorageResult<PageStats> {
        let (pages, total_bytes, hosts): (i64, i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(content_length), 0), COUNT(DISTINCT host) FROM pages",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let by_status: Vec<(i32, u64)> = self.grouped(
            "SELECT fetch_status, COUNT(*) AS n FROM pages GROUP BY fetch_status ORDER BY n DESC, fetch_status",
            None,
        )?;
        let succeeded: u64 = by_status
            .iter()
            .filter(|(code, _)| fetch_status::is_success(*code))
            .map(|(_, n)| n)
            .sum();
        let failed = pages as u64 - succeeded;

        Ok(PageStats {
            pages: pages as u64,
            succeeded,
            failed,
            total_bytes: total_bytes as u64,
            hosts: hosts as u64,
            by_status,
            top_hosts: self.grouped(
                "SELECT host, COUNT(*) AS n FROM pages GROUP BY host ORDER BY n DESC, host LIMIT ?1",
                Some(TOP_LIMIT),
            )?,
            by_content_type: self.grouped(
                "SELECT COALESCE(content_type, '-'), COUNT(*) AS n FROM pages
                 GROUP BY content_type ORDER BY n DESC LIMIT ?1",
                Some(TOP_LIMIT),
            )?,
        })
    }

    fn grouped<K>(&self, sql: &str, limit: Option<usize>) -> StorageResult<Vec<(K, u64)>>
    where
        K: rusqlite::types::FromSql,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let map = |row: &Row<'_>| -> rusqlite::Result<(K, u64)> {
            Ok((row.get(0)?, row.get::<_, i64>(1)? as u64))
        };
        let rows = match limit {
            Some(limit) => stmt
                .query_map(params![limit as i64], map)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    // ===== Snapshot =====

    /// Writes a compacted copy of the store to `target`
    pub fn snapshot_into(&self, target: &Path) -> StorageResult<()> {
        if target.exists() {
            std::fs::remove_file(target)?;
        }
        let target = target.to_string_lossy();
        self.conn.execute("VACUUM INTO ?1", params![target.as_ref()])?;
        Ok(())
    }
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<PageRecord> {
    Ok(PageRecord {
        uri: row.get(0)?,
        host: row.get(1)?,
        fetch_status: row.get(2)?,
        content_type: row.get(3)?,
        content_length: row.get::<_, i64>(4)? as u64,
        content_digest: row.get(5)?,
        path_from_seed: row.get(6)?,
        via: row.get(7)?,
        outlinks: row.get::<_, i64>(8)? as u64,
        fetch_attempts: row.get(9)?,
        thread: row.get(10)?,
        written_at: row.get(11)?,
    })
}
