//! Processing pipeline module
//!
//! # Components
//!
//! - `Processor`: one stage, gated by its decide rules and `<name>.enabled`
//! - `ProcessorChain`: an ordered, named run of stages
//! - `ProcessorChainList`: the chains wired into a single pipeline
//! - `ProcessorContext`: the crawl-wide handles a stage may use

mod chain;
mod context;
mod decide;
mod processor;

pub use chain::{ProcessorChain, ProcessorChainList, SharedProcessor, Stage};
pub use context::ProcessorContext;
pub use decide::{DecideRules, Decision};
pub use processor::{Processor, ProcessorError};
