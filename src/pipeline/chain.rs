//! Pipeline topology: stages wired into chains, chains wired into a list
//!
//! The topology is fixed at construction. Each stage's default next stage
//! is the one after it; each chain's default next chain is the one after
//! it. The last of each points nowhere, which ends the chain (or the whole
//! traversal).

use crate::pipeline::context::ProcessorContext;
use crate::pipeline::decide::{DecideRules, Decision};
use crate::pipeline::processor::{Processor, ProcessorError};
use crate::settings::Settings;
use crate::uri::CrawlUri;
use crate::ConfigError;
use chrono::Utc;
use std::sync::Arc;

/// A processor shared by all workers
pub type SharedProcessor = Arc<dyn Processor + Sync>;

/// Chain names treated as the post-processing chain
const POST_CHAIN_NAMES: &[&str] = &["post", "post-processor", "postprocessor"];

/// One wired stage of a chain
pub struct Stage {
    processor: SharedProcessor,
    rules: DecideRules,
    default_next: Option<usize>,
}

impl Stage {
    pub fn name(&self) -> &str {
        self.processor.name()
    }

    pub fn processor(&self) -> &SharedProcessor {
        &self.processor
    }

    pub fn rules(&self) -> &DecideRules {
        &self.rules
    }

    /// Index of the stage that runs next unless the stage redirects
    pub fn default_next(&self) -> Option<usize> {
        self.default_next
    }

    /// Runs this stage on `curi` using `instance`
    ///
    /// `instance` is the shared processor or the calling worker's private
    /// copy of it. The item's next-stage pointer is set to the default
    /// before anything else, so a failing stage still leaves a usable
    /// position behind. A stage disabled through `<name>.enabled` does
    /// nothing; otherwise the decide rules pick between
    /// `inner_process` and `inner_reject_process`.
    pub fn process(
        &self,
        instance: &dyn Processor,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        curi.set_next_processor(self.default_next);

        let enabled_key = format!("{}.enabled", self.name());
        if !ctx.settings().bool_attribute(&enabled_key, Some(curi), true) {
            return Ok(());
        }

        match self.rules.decide(curi) {
            Decision::Accept => instance.inner_process(ctx, curi),
            Decision::Reject => instance.inner_reject_process(ctx, curi),
        }
    }
}

/// An ordered, named sequence of stages
pub struct ProcessorChain {
    name: String,
    stages: Vec<Stage>,
    default_next_chain: Option<usize>,
}

impl ProcessorChain {
    /// Builds a chain, wiring each stage to the one after it
    pub fn new(name: impl Into<String>, stages: Vec<(SharedProcessor, DecideRules)>) -> Self {
        let count = stages.len();
        let stages = stages
            .into_iter()
            .enumerate()
            .map(|(i, (processor, rules))| Stage {
                processor,
                rules,
                default_next: if i + 1 < count { Some(i + 1) } else { None },
            })
            .collect();
        Self {
            name: name.into(),
            stages,
            default_next_chain: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn default_next_chain(&self) -> Option<usize> {
        self.default_next_chain
    }
}

/// The full pipeline: an ordered list of chains
pub struct ProcessorChainList {
    chains: Vec<ProcessorChain>,
}

impl ProcessorChainList {
    /// Wires `chains` into one pipeline
    ///
    /// # Returns
    ///
    /// * `Ok(ProcessorChainList)` - The wired pipeline
    /// * `Err(ConfigError::Validation)` - No chain holds any stage
    pub fn new(mut chains: Vec<ProcessorChain>) -> Result<Self, ConfigError> {
        if chains.iter().all(ProcessorChain::is_empty) {
            return Err(ConfigError::Validation(
                "No processors defined".to_string(),
            ));
        }

        let count = chains.len();
        for (i, chain) in chains.iter_mut().enumerate() {
            chain.default_next_chain = if i + 1 < count { Some(i + 1) } else { None };
        }
        Ok(Self { chains })
    }

    pub fn chain(&self, index: usize) -> Option<&ProcessorChain> {
        self.chains.get(index)
    }

    pub fn chains(&self) -> &[ProcessorChain] {
        &self.chains
    }

    pub fn chain_index(&self, name: &str) -> Option<usize> {
        self.chains.iter().position(|c| c.name == name)
    }

    /// Index of the post-processing chain: the chain named `post` (or
    /// `post-processor`), falling back to the last chain
    pub fn post_chain_index(&self) -> usize {
        self.chains
            .iter()
            .position(|c| POST_CHAIN_NAMES.contains(&c.name.as_str()))
            .unwrap_or(self.chains.len().saturating_sub(1))
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn processor_count(&self) -> usize {
        self.chains.iter().map(ProcessorChain::len).sum()
    }

    /// Every stage in traversal order
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.chains.iter().flat_map(|c| c.stages.iter())
    }

    pub fn initial_tasks(&self) {
        for stage in self.stages() {
            stage.processor.initial_tasks();
        }
    }

    pub fn final_tasks(&self) {
        for stage in self.stages() {
            stage.processor.final_tasks();
        }
    }

    pub fn kick_update(&self, settings: &dyn Settings) {
        for stage in self.stages() {
            stage.processor.kick_update(settings);
        }
    }

    /// The `processors` report: every stage's own report, in order
    pub fn report(&self, crawl_name: &str) -> String {
        let mut out = format!(
            "Processors report - {}\n  Job being crawled:    {}\n  Number of Processors: {}\n  NOTE: Some processors may not return a report!\n\n",
            Utc::now().format("%Y%m%d%H%M"),
            crawl_name,
            self.processor_count()
        );
        for stage in self.stages() {
            out.push_str(&stage.processor.report());
        }
        out
    }
}
