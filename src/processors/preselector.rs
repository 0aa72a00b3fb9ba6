//! Early rejection of items before any network work
//!
//! Operator settings (all URI-scoped, so host overrides apply):
//! - `<name>.block-all`: block everything
//! - `<name>.allow-by-regexp`: when set, block URIs that do not match
//! - `<name>.block-by-regexp`: block URIs that match
//!
//! Blocked items get [`S_BLOCKED_BY_USER`]. Items outside the crawl scope
//! (allowed hosts, maximum link hops) get [`S_OUT_OF_SCOPE`]. Either way
//! the item skips straight to the post-processing chain.

use crate::config::CrawlOrder;
use crate::pipeline::{Processor, ProcessorContext, ProcessorError};
use crate::settings::Settings;
use crate::uri::fetch_status::{S_BLOCKED_BY_USER, S_OUT_OF_SCOPE};
use crate::uri::{matches_any, CrawlUri, HostPattern};
use crate::ConfigError;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

pub struct Preselector {
    name: String,
    hosts: Vec<HostPattern>,
    max_hops: usize,
    /// Compiled patterns by source text; `None` marks an invalid pattern
    patterns: Mutex<HashMap<String, Option<Regex>>>,
    blocked: AtomicU64,
    out_of_scope: AtomicU64,
}

impl Preselector {
    /// Creates the stage; the scope comes from the order's `[scope]`
    ///
    /// Without `allowed-hosts` the scope is the set of seed hosts.
    pub fn new(name: &str, order: &CrawlOrder) -> Result<Self, ConfigError> {
        let hosts = if order.scope.allowed_hosts.is_empty() {
            order
                .scope
                .seeds
                .iter()
                .filter_map(|seed| Url::parse(seed).ok())
                .filter_map(|url| url.host_str().map(HostPattern::parse))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            order
                .scope
                .allowed_hosts
                .iter()
                .map(|h| HostPattern::parse(h))
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Self {
            name: name.to_string(),
            hosts,
            max_hops: order.scope.max_hops,
            patterns: Mutex::new(HashMap::new()),
            blocked: AtomicU64::new(0),
            out_of_scope: AtomicU64::new(0),
        })
    }

    fn key(&self, attribute: &str) -> String {
        format!("{}.{}", self.name, attribute)
    }

    /// Tests `uri` against `pattern`, compiling it once
    ///
    /// An invalid pattern matches nothing; it is reported the first time
    /// it is seen.
    fn pattern_matches(&self, pattern: &str, uri: &str) -> Option<bool> {
        let mut patterns = self.patterns.lock();
        let compiled = patterns
            .entry(pattern.to_string())
            .or_insert_with(|| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!("{}: ignoring invalid pattern '{}': {}", self.name, pattern, e);
                    None
                }
            });
        compiled.as_ref().map(|regex| regex.is_match(uri))
    }

    fn is_blocked(&self, ctx: &ProcessorContext, curi: &CrawlUri) -> bool {
        let settings = ctx.settings();
        if settings.bool_attribute(&self.key("block-all"), Some(curi), false) {
            return true;
        }

        let uri = curi.uri().as_str();
        let allow = settings.str_attribute(&self.key("allow-by-regexp"), Some(curi), "");
        if !allow.is_empty() && self.pattern_matches(&allow, uri) == Some(false) {
            return true;
        }

        let block = settings.str_attribute(&self.key("block-by-regexp"), Some(curi), "");
        !block.is_empty() && self.pattern_matches(&block, uri) == Some(true)
    }

    fn in_scope(&self, curi: &CrawlUri) -> bool {
        if curi.is_seed() {
            return true;
        }
        if self.max_hops > 0 && curi.link_hops() > self.max_hops {
            return false;
        }
        matches_any(&self.hosts, &curi.host())
    }
}

impl Processor for Preselector {
    fn name(&self) -> &str {
        &self.name
    }

    fn inner_process(
        &self,
        ctx: &ProcessorContext,
        curi: &mut CrawlUri,
    ) -> Result<(), ProcessorError> {
        if self.is_blocked(ctx, curi) {
            tracing::debug!("{} blocked {}", self.name, curi);
            self.blocked.fetch_add(1, Ordering::Relaxed);
            curi.set_fetch_status(S_BLOCKED_BY_USER);
            curi.skip_to_chain(ctx.post_chain());
        } else if !self.in_scope(curi) {
            tracing::debug!("{} ruled {} out of scope", self.name, curi);
            self.out_of_scope.fetch_add(1, Ordering::Relaxed);
            curi.set_fetch_status(S_OUT_OF_SCOPE);
            curi.skip_to_chain(ctx.post_chain());
        }
        Ok(())
    }

    fn kick_update(&self, _settings: &dyn Settings) {
        self.patterns.lock().clear();
    }

    fn report(&self) -> String {
        format!(
            "Processor: {}\n  Blocked by settings: {}\n  Out of scope: {}\n",
            self.name,
            self.blocked.load(Ordering::Relaxed),
            self.out_of_scope.load(Ordering::Relaxed)
        )
    }
}
