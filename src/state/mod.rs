//! State module for the crawl lifecycle
//!
//! # Components
//!
//! - `CrawlState`: the controller's single authoritative lifecycle value
//! - `status`: job status strings used as listener messages and exit reasons

mod crawl_state;
pub mod status;

pub use crawl_state::CrawlState;
