//! Server state updates from robots.txt fetches

use crate::pipeline::{Processor, ProcessorContext, ProcessorError};
use crate::processors::ROBOTS_PATH;
use crate::server::RobotsPolicy;
use crate::uri::fetch_status::{S_DEFERRED, S_UNATTEMPTED};
use crate::uri::CrawlUri;

pub struct CrawlStateUpdater {
    name: String,
}

impl CrawlStateUpdater {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Processor for CrawlStateUpdater {
    fn name(&self) -> &str {
        &self.name
    }

    fn inner_process(
        &self,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        if !curi.is_prerequisite() || curi.uri().path() != ROBOTS_PATH {
            return Ok(());
        }

        let status = curi.fetch_status();
        if status == S_UNATTEMPTED || status == S_DEFERRED {
            return Ok(());
        }

        let key = curi.server_key();
        match status {
            200..=299 => {
                let body = curi.body().unwrap_or_default();
                let policy = RobotsPolicy::from_content(&String::from_utf8_lossy(body));
                tracing::debug!("{} stored robots.txt for {}", self.name, key);
                ctx.server_cache().update(&key, |s| s.update_robots(policy));
            }
            400..=499 => {
                tracing::debug!("{}: {} has no robots.txt ({})", self.name, key, status);
                ctx.server_cache()
                    .update(&key, |s| s.update_robots(RobotsPolicy::allow_all()));
            }
            _ => {
                let failures = ctx.server_cache().update(&key, |s| {
                    s.note_robots_failure();
                    s.robots_failures()
                });
                tracing::info!(
                    "Fetching robots.txt for {} failed with status {} ({} failures)",
                    key,
                    status,
                    failures
                );
            }
        }
        Ok(())
    }
}
