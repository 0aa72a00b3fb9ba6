//! Concrete processing stages and the registry that builds them
//!
//! A crawl order names each stage by `kind`. [`build_chains`] turns the
//! order's `[[chain]]` tables into a wired [`ProcessorChainList`].
//!
//! | Kind | Conventional chain | Role |
//! |------|--------------------|------|
//! | `preselector` | pre-fetch | operator blocks, scope re-check |
//! | `precondition` | pre-fetch | robots.txt prerequisites and exclusion |
//! | `fetch-http` | fetch | HTTP GET |
//! | `extract-html` | extract | link extraction |
//! | `page-writer` | write | one page-store row per fetched URI |
//! | `crawl-state-updater` | post | server robots state |
//! | `link-scheduler` | post | prerequisites and outlinks into the frontier |

mod crawl_state_updater;
mod extract_html;
mod fetch_http;
mod link_scheduler;
mod page_writer;
mod precondition;
mod preselector;

pub use crawl_state_updater::CrawlStateUpdater;
pub use extract_html::ExtractHtml;
pub use fetch_http::{FetchHttp, DEFAULT_MAX_LENGTH_BYTES};
pub use link_scheduler::LinkScheduler;
pub use page_writer::PageWriter;
pub use precondition::{Precondition, MAX_ROBOTS_FAILURES};
pub use preselector::Preselector;

use crate::config::{CrawlOrder, ProcessorConfig};
use crate::pipeline::{DecideRules, ProcessorChain, ProcessorChainList, SharedProcessor};
use crate::ConfigError;
use std::sync::Arc;

/// Every kind an order may name
pub const PROCESSOR_KINDS: &[&str] = &[
    "preselector",
    "precondition",
    "fetch-http",
    "extract-html",
    "page-writer",
    "crawl-state-updater",
    "link-scheduler",
];

/// Path of a robots.txt URI
pub(crate) const ROBOTS_PATH: &str = "/robots.txt";

/// Builds the pipeline described by the order's chains
///
/// # Returns
///
/// * `Ok(ProcessorChainList)` - Every stage built and wired
/// * `Err(ConfigError::Validation)` - Unknown kind, or no stage at all
/// * `Err(ConfigError::InvalidPattern)` - A decide rule names a bad host pattern
pub fn build_chains(order: &CrawlOrder) -> Result<ProcessorChainList, ConfigError> {
    let mut chains = Vec::with_capacity(order.chains.len());
    for chain in &order.chains {
        let mut stages = Vec::with_capacity(chain.processors.len());
        for config in &chain.processors {
            let processor = build_processor(config, order)?;
            let rules = DecideRules::from_config(&config.rules)?;
            stages.push((processor, rules));
        }
        tracing::debug!("Built chain '{}' with {} stages", chain.name, stages.len());
        chains.push(ProcessorChain::new(chain.name.clone(), stages));
    }
    ProcessorChainList::new(chains)
}

fn build_processor(
    config: &ProcessorConfig,
    order: &CrawlOrder,
) -> Result<SharedProcessor, ConfigError> {
    let name = config.stage_name();
    let processor: SharedProcessor = match config.kind.as_str() {
        "preselector" => Arc::new(Preselector::new(name, order)?),
        "precondition" => Arc::new(Precondition::new(name, order)),
        "fetch-http" => Arc::new(FetchHttp::new(name, order)?),
        "extract-html" => Arc::new(ExtractHtml::new(name)),
        "page-writer" => Arc::new(PageWriter::new(name, order)),
        "crawl-state-updater" => Arc::new(CrawlStateUpdater::new(name)),
        "link-scheduler" => Arc::new(LinkScheduler::new(name)),
        other => {
            return Err(ConfigError::Validation(format!(
                "processor '{}': unknown kind '{}' (expected one of {})",
                name,
                other,
                PROCESSOR_KINDS.join(", ")
            )))
        }
    };
    Ok(processor)
}
