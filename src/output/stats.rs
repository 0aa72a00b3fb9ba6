//! Statistics over a crawl's page store
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::storage::{PageStats, PageStore};
use crate::uri::fetch_status::fetch_status_text;
use crate::Result;
use std::fmt::Write;
use std::path::Path;

/// Crawl statistics summary
#[derive(Debug, Clone, Default)]
pub struct CrawlStatistics {
    /// Name recorded by the crawl that wrote the store
    pub crawl_name: Option<String>,

    /// Aggregates over every recorded page
    pub pages: PageStats,
}

impl CrawlStatistics {
    /// Share of recorded pages fetched successfully, in percent
    pub fn success_rate(&self) -> f64 {
        if self.pages.pages == 0 {
            0.0
        } else {
            self.pages.succeeded as f64 / self.pages.pages as f64 * 100.0
        }
    }
}

/// Loads statistics from the page store at `path`
///
/// # Arguments
///
/// * `path` - The page store database file
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(CrawlError)` - The store is missing or could not be queried
pub fn load_statistics(path: &Path) -> Result<CrawlStatistics> {
    let store = PageStore::open_existing(path)?;
    Ok(CrawlStatistics {
        crawl_name: store.info("crawl-name")?,
        pages: store.stats()?,
    })
}

fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Formats statistics for the terminal
pub fn format_statistics(stats: &CrawlStatistics) -> String {
    let p = &stats.pages;
    let mut out = String::new();
    // writing to a String cannot fail
    let _ = writeln!(out, "=== Crawl Statistics ===\n");
    if let Some(name) = &stats.crawl_name {
        let _ = writeln!(out, "Crawl: {}\n", name);
    }

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  Pages recorded: {}", p.pages);
    let _ = writeln!(out, "  Hosts: {}", p.hosts);
    let _ = writeln!(out, "  Bytes downloaded: {}", p.total_bytes);
    let _ = writeln!(out);

    if !p.by_status.is_empty() {
        let _ = writeln!(out, "Pages by Fetch Status:");
        for (code, count) in &p.by_status {
            let _ = writeln!(
                out,
                "  {} ({}): {} ({:.1}%)",
                code,
                fetch_status_text(*code),
                count,
                percent(*count, p.pages)
            );
        }
        let _ = writeln!(out);
    }

    if !p.top_hosts.is_empty() {
        let _ = writeln!(out, "Top Hosts:");
        for (host, count) in &p.top_hosts {
            let _ = writeln!(out, "  {}: {}", host, count);
        }
        let _ = writeln!(out);
    }

    if !p.by_content_type.is_empty() {
        let _ = writeln!(out, "Content Types:");
        for (content_type, count) in &p.by_content_type {
            let _ = writeln!(out, "  {}: {}", content_type, count);
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(
        out,
        "Success Rate: {:.1}% ({} / {} pages successfully fetched)",
        stats.success_rate(),
        p.succeeded,
        p.pages
    );
    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", format_statistics(stats));
}
