//! Hands discovered URIs to the frontier

use crate::pipeline::{Processor, ProcessorContext, ProcessorError};
use crate::uri::CrawlUri;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct LinkScheduler {
    name: String,
    scheduled: AtomicU64,
    duplicates: AtomicU64,
}

impl LinkScheduler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scheduled: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    fn count(&self, added: bool) {
        if added {
            self.scheduled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Processor for LinkScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    /// Schedules the prerequisite of a deferred item, or else its outlinks
    fn inner_process(
        &self,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        ctx.check_for_interrupt()?;
        if let Some(prerequisite) = curi.prerequisite_uri() {
            let added = ctx.frontier().schedule(prerequisite.clone())?;
            self.count(added);
            return Ok(());
        }

        for candidate in curi.take_outlinks() {
            ctx.check_for_interrupt()?;
            let added = ctx.frontier().schedule(candidate)?;
            self.count(added);
        }
        Ok(())
    }

    fn report(&self) -> String {
        format!(
            "Processor: {}\n  Scheduled: {}\n  Already known: {}\n",
            self.name,
            self.scheduled.load(Ordering::Relaxed),
            self.duplicates.load(Ordering::Relaxed)
        )
    }
}
