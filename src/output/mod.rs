//! Output module for reporting on a crawl's page store
//!
//! This module handles the `--stats` report: loading aggregate numbers from
//! a job's page store and formatting them for the terminal.

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, CrawlStatistics};
