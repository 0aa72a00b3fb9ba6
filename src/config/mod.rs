//! Configuration module for crawl orders
//!
//! This module handles loading, parsing, and validating TOML crawl orders.
//!
//! # Example
//!
//! ```no_run
//! use crawl_controller::config::load_order;
//! use std::path::Path;
//!
//! let order = load_order(Path::new("order.toml")).unwrap();
//! println!("Crawl '{}' with {} toe threads", order.crawl.name, order.crawl.max_toe_threads);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    ChainConfig, CrawlOrder, CrawlSection, DecideRuleConfig, DiskSection, OverrideConfig,
    ProcessorConfig, ScopeConfig, UserAgentConfig,
};

pub use parser::{compute_order_hash, load_order, load_order_with_hash, parse_order};
pub use validation::MAX_TOE_THREADS;
