//! Robots.txt policy of one server
//!
//! Matching is delegated to the robotstxt crate; the policy keeps the raw
//! body plus the time it was fetched so stale policies are refetched.

use chrono::{DateTime, Duration, Utc};
use robotstxt::DefaultMatcher;

/// Hours after which a fetched robots.txt must be fetched again
pub const ROBOTS_VALIDITY_HOURS: i64 = 24;

/// A server's robots.txt, as last fetched
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    content: String,
    allow_all: bool,
    fetched_at: DateTime<Utc>,
}

impl RobotsPolicy {
    /// Creates a policy from a fetched robots.txt body
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
            fetched_at: Utc::now(),
        }
    }

    /// A policy allowing everything
    ///
    /// Used when the server has no robots.txt (a 4xx answer).
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
            fetched_at: Utc::now(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }

    /// True once the policy is older than its validity window
    pub fn is_stale(&self) -> bool {
        self.age() > Duration::hours(ROBOTS_VALIDITY_HOURS)
    }

    /// Checks whether `url` may be fetched by `user_agent`
    ///
    /// # Arguments
    ///
    /// * `url` - Full URL or path to check
    /// * `user_agent` - Product token of the crawler
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// `Crawl-delay` for `user_agent`, preferring its own group over `*`
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        if self.allow_all {
            return None;
        }
        let agent = user_agent.to_lowercase();
        let mut group: Vec<String> = Vec::new();
        let mut in_directives = false;
        let mut for_agent = None;
        let mut for_wildcard = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if in_directives {
                        group.clear();
                        in_directives = false;
                    }
                    group.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_directives = true;
                    let Ok(delay) = value.parse::<f64>() else {
                        continue;
                    };
                    if group.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                        for_agent = Some(delay);
                    } else if group.iter().any(|ua| ua == "*") {
                        for_wildcard = Some(delay);
                    }
                }
                _ => in_directives = true,
            }
        }
        for_agent.or(for_wildcard)
    }

    #[cfg(test)]
    pub(crate) fn set_fetched_at(&mut self, at: DateTime<Utc>) {
        self.fetched_at = at;
    }
}
