//! URI handling module
//!
//! This module provides the crawl work item (`CrawlUri`), discovered-link
//! candidates, fetch status codes, canonicalization and host patterns.

mod crawl_uri;
pub mod fetch_status;
mod matcher;
mod normalize;

pub use crawl_uri::{CandidateUri, CrawlUri, HOP_EMBED, HOP_LINK, HOP_PREREQUISITE, HOP_REDIRECT};
pub use matcher::{matches_any, HostPattern};
pub use normalize::{canonicalize, parse_http_uri, resolve_link};
