//! Robots.txt preconditions
//!
//! Before an item may be fetched its server needs a fresh robots.txt
//! policy. Without one the item is deferred behind a prerequisite fetch of
//! `/robots.txt`; the frontier hands it out again once that fetch is done.

use crate::config::CrawlOrder;
use crate::pipeline::{Processor, ProcessorContext, ProcessorError};
use crate::processors::ROBOTS_PATH;
use crate::uri::fetch_status::{S_PREREQUISITE_FAILURE, S_ROBOTS_PRECLUDED};
use crate::uri::CrawlUri;
use crate::UrlError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Failed robots.txt fetches after which a server's items fail outright
pub const MAX_ROBOTS_FAILURES: u32 = 3;

/// Annotation left on items robots.txt would have excluded
const ROBOTS_EXCLUDED: &str = "robotExcluded";

pub struct Precondition {
    name: String,
    /// Product token matched against robots.txt user-agent lines
    agent: String,
    deferred: AtomicU64,
    precluded: AtomicU64,
}

impl Precondition {
    pub fn new(name: &str, order: &CrawlOrder) -> Self {
        Self {
            name: name.to_string(),
            agent: order.user_agent.crawler_name.clone(),
            deferred: AtomicU64::new(0),
            precluded: AtomicU64::new(0),
        }
    }

    fn fail(&self, ctx: &ProcessorContext, curi: &mut CrawlUri, status: i32) {
        curi.set_fetch_status(status);
        curi.skip_to_chain(ctx.post_chain());
    }
}

impl Processor for Precondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn inner_process(
        &self,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        if curi.uri().path() == ROBOTS_PATH {
            curi.set_prerequisite(true);
            return Ok(());
        }

        let server = ctx.server_cache().server(&curi.server_key());
        let Some(policy) = server.robots().filter(|_| server.has_valid_robots()) else {
            if server.robots_failures() >= MAX_ROBOTS_FAILURES {
                tracing::debug!(
                    "{}: robots.txt of {} failed {} times, giving up on {}",
                    self.name,
                    server.key(),
                    server.robots_failures(),
                    curi
                );
                self.fail(ctx, curi, S_PREREQUISITE_FAILURE);
                return Ok(());
            }

            let robots = curi
                .uri()
                .join(ROBOTS_PATH)
                .map_err(|e| UrlError::Parse(e.to_string()))?;
            tracing::debug!("{} deferring {} behind {}", self.name, curi, robots);
            self.deferred.fetch_add(1, Ordering::Relaxed);
            curi.mark_prerequisite(robots, ctx.post_chain());
            return Ok(());
        };

        if !policy.is_allowed(curi.uri().as_str(), &self.agent) {
            let key = format!("{}.calculate-robots-only", self.name);
            if ctx.settings().bool_attribute(&key, Some(curi), false) {
                curi.add_annotation(ROBOTS_EXCLUDED);
            } else {
                self.precluded.fetch_add(1, Ordering::Relaxed);
                self.fail(ctx, curi, S_ROBOTS_PRECLUDED);
            }
        }
        Ok(())
    }

    fn report(&self) -> String {
        format!(
            "Processor: {}\n  Deferred for robots.txt: {}\n  Precluded by robots.txt: {}\n",
            self.name,
            self.deferred.load(Ordering::Relaxed),
            self.precluded.load(Ordering::Relaxed)
        )
    }
}
