//! crawl-controller: a toe-threaded crawl controller
//!
//! This crate drives a pool of worker threads ("toe threads") through a
//! chained per-URI processing pipeline, coordinating start, pause,
//! checkpoint and stop across all of them, with a single-thread emergency
//! mode for surviving resource exhaustion.

pub mod config;
pub mod crawler;
pub mod frontier;
pub mod output;
pub mod pipeline;
pub mod processors;
pub mod server;
pub mod settings;
pub mod state;
pub mod storage;
pub mod uri;

use thiserror::Error;

/// Main error type for crawl controller operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A fatal failure while setting up a crawl; the crawl never runs
    #[error("Unable to initialize crawl '{crawl}' ({step}): {source}")]
    Initialization {
        crawl: String,
        step: &'static str,
        source: Box<CrawlError>,
    },

    #[error("Cannot {operation} while crawl is {state}")]
    IllegalState {
        operation: &'static str,
        state: state::CrawlState,
    },

    #[error("A checkpoint is already in progress")]
    CheckpointInProgress,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Crawl has finished; the controller cannot be reused")]
    Finished,

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] frontier::FrontierError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read crawl order: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in crawl order: {0}")]
    InvalidUrl(String),

    #[error("Invalid host pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for crawl controller operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::CrawlOrder;
pub use crawler::{CrawlController, CrawlStatusListener, ToePool, ToeThread};
pub use frontier::{Frontier, MemoryFrontier};
pub use pipeline::{Processor, ProcessorChain, ProcessorChainList, ProcessorError};
pub use settings::{OrderSettings, Settings};
pub use state::CrawlState;
pub use uri::{CandidateUri, CrawlUri};
