//! Per-server state shared by all workers
//!
//! Servers are keyed by `host:port`. Each one carries its robots.txt
//! policy, the count of failed robots.txt fetches, and fetch totals.

mod robots;

pub use robots::{RobotsPolicy, ROBOTS_VALIDITY_HOURS};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// What is known about one server
#[derive(Debug, Clone)]
pub struct CrawlServer {
    key: String,
    robots: Option<RobotsPolicy>,
    robots_failures: u32,
    fetch_count: u64,
    byte_count: u64,
    last_fetch: Option<DateTime<Utc>>,
}

impl CrawlServer {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            robots: None,
            robots_failures: 0,
            fetch_count: 0,
            byte_count: 0,
            last_fetch: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn robots(&self) -> Option<&RobotsPolicy> {
        self.robots.as_ref()
    }

    /// True if a fresh robots policy is on hand
    pub fn has_valid_robots(&self) -> bool {
        self.robots.as_ref().map_or(false, |r| !r.is_stale())
    }

    /// Stores a newly fetched policy and forgets earlier failures
    pub fn update_robots(&mut self, policy: RobotsPolicy) {
        self.robots = Some(policy);
        self.robots_failures = 0;
    }

    pub fn note_robots_failure(&mut self) {
        self.robots_failures += 1;
    }

    pub fn robots_failures(&self) -> u32 {
        self.robots_failures
    }

    pub fn note_fetch(&mut self, bytes: u64) {
        self.fetch_count += 1;
        self.byte_count += bytes;
        self.last_fetch = Some(Utc::now());
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetch_count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.last_fetch
    }
}

/// Registry of every server the crawl has touched
#[derive(Debug, Default)]
pub struct ServerCache {
    servers: Mutex<HashMap<String, CrawlServer>>,
}

impl ServerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the server's current state, created if unknown
    pub fn server(&self, key: &str) -> CrawlServer {
        self.update(key, |s| s.clone())
    }

    /// Runs `f` on the server under the cache lock
    pub fn update<F, R>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut CrawlServer) -> R,
    {
        let mut servers = self.servers.lock();
        let server = servers
            .entry(key.to_string())
            .or_insert_with(|| CrawlServer::new(key));
        f(server)
    }

    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    pub fn report(&self) -> String {
        let servers = self.servers.lock();
        let mut keys: Vec<&String> = servers.keys().collect();
        keys.sort();
        let mut out = format!("Servers report - {} servers\n", servers.len());
        for key in keys {
            let s = &servers[key];
            out.push_str(&format!(
                " {} fetches={} bytes={} robots={}{}\n",
                s.key,
                s.fetch_count,
                s.byte_count,
                match &s.robots {
                    Some(r) if r.is_stale() => "stale",
                    Some(_) => "valid",
                    None => "none",
                },
                if s.robots_failures > 0 {
                    format!(" robots-failures={}", s.robots_failures)
                } else {
                    String::new()
                }
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_created_on_demand() {
        let cache = ServerCache::new();
        assert!(cache.is_empty());
        let server = cache.server("a.com:80");
        assert_eq!(server.key(), "a.com:80");
        assert!(!server.has_valid_robots());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_robots_update_resets_failures() {
        let cache = ServerCache::new();
        cache.update("a.com:80", CrawlServer::note_robots_failure);
        cache.update("a.com:80", CrawlServer::note_robots_failure);
        assert_eq!(cache.server("a.com:80").robots_failures(), 2);

        cache.update("a.com:80", |s| s.update_robots(RobotsPolicy::allow_all()));
        let server = cache.server("a.com:80");
        assert_eq!(server.robots_failures(), 0);
        assert!(server.has_valid_robots());
    }

    #[test]
    fn test_report_lists_servers() {
        let cache = ServerCache::new();
        cache.update("b.com:80", |s| s.note_fetch(10));
        cache.update("a.com:443", CrawlServer::note_robots_failure);
        let report = cache.report();
        assert!(report.starts_with("Servers report - 2 servers"));
        assert!(report.contains("b.com:80 fetches=1 bytes=10 robots=none"));
        assert!(report.contains("robots-failures=1"));
        assert!(report.find("a.com").unwrap() < report.find("b.com").unwrap());
    }
}
