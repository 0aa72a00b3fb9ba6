//! The processing stage abstraction

use crate::frontier::FrontierError;
use crate::pipeline::context::ProcessorContext;
use crate::settings::Settings;
use crate::storage::StorageError;
use crate::uri::CrawlUri;
use crate::UrlError;
use std::collections::TryReserveError;
use thiserror::Error;

/// Failures raised by a stage while processing one item
///
/// Every variant is recoverable for the crawl except
/// [`ResourceExhausted`](ProcessorError::ResourceExhausted), which sends the
/// crawl into single-thread mode and requests a pause, and
/// [`Interrupted`](ProcessorError::Interrupted), which ends the worker's
/// traversal of the current item.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Frontier error: {0}")]
    Frontier(#[from] FrontierError),

    #[error("Stage panicked: {0}")]
    Panic(String),

    #[error("{0}")]
    Runtime(String),

    #[error("Resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Processing interrupted")]
    Interrupted,
}

impl ProcessorError {
    /// Short kind name, recorded on items as an `err=<kind>` annotation
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Io(_) => "Io",
            Self::Database(_) => "Database",
            Self::Storage(_) => "Storage",
            Self::Http(_) => "Http",
            Self::Url(_) => "Url",
            Self::Frontier(_) => "Frontier",
            Self::Panic(_) => "Panic",
            Self::Runtime(_) => "Runtime",
            Self::ResourceExhausted(_) => "ResourceExhausted",
            Self::Interrupted => "Interrupted",
        }
    }

    /// True for errors that threaten the whole process, not just one item
    pub fn is_serious(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

impl From<TryReserveError> for ProcessorError {
    fn from(err: TryReserveError) -> Self {
        Self::ResourceExhausted(err.to_string())
    }
}

/// One stage of the processing pipeline
///
/// Shared stages are used by every worker at once through `&self`. A stage
/// that keeps per-item mutable state declares
/// [`instance_per_worker`](Processor::instance_per_worker) and hands out a
/// private copy per worker from
/// [`create_worker_local_instance`](Processor::create_worker_local_instance).
pub trait Processor: Send {
    /// Stage name, unique within the pipeline; prefixes its settings keys
    fn name(&self) -> &str;

    /// Work done on items the stage's decide rules accept
    fn inner_process(
        &self,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError>;

    /// Work done on items the stage's decide rules reject
    fn inner_reject_process(
        &self,
        _ctx: &ProcessorContext,
        _curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Runs once when the crawl starts
    fn initial_tasks(&self) {}

    /// Runs once when the crawl has stopped
    fn final_tasks(&self) {}

    /// Settings changed at runtime
    fn kick_update(&self, _settings: &dyn Settings) {}

    fn report(&self) -> String {
        format!("Processor: {}\n", self.name())
    }

    /// True if each worker needs its own instance of this stage
    fn instance_per_worker(&self) -> bool {
        false
    }

    /// Creates the private instance used by worker `serial`
    ///
    /// Only called when [`instance_per_worker`](Processor::instance_per_worker)
    /// is true.
    fn create_worker_local_instance(
        &self,
        _serial: u32,
    ) -> Result<Box<dyn Processor>, ProcessorError> {
        Err(ProcessorError::Runtime(format!(
            "processor '{}' has no worker-local instances",
            self.name()
        )))
    }
}
