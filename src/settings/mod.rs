//! Settings lookup for the crawl core
//!
//! The core only needs typed, optionally URI-scoped attribute lookup and a
//! way to learn that settings changed at runtime. [`OrderSettings`] provides
//! that from the crawl order's `[settings]` table and its per-host
//! `[[override]]` entries.

use crate::config::CrawlOrder;
use crate::uri::{CrawlUri, HostPattern};
use crate::ConfigError;
use parking_lot::RwLock;
use toml::{Table, Value};

/// Typed attribute lookup, optionally scoped to the URI being processed
///
/// Keys are `"<component>.<attribute>"`, e.g. `"fetch-http.enabled"`.
pub trait Settings: Send + Sync {
    /// Returns the raw value for `key`, honoring overrides for `context`
    fn attribute(&self, key: &str, context: Option<&CrawlUri>) -> Option<Value>;

    fn bool_attribute(&self, key: &str, context: Option<&CrawlUri>, default: bool) -> bool {
        self.attribute(key, context)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    fn u64_attribute(&self, key: &str, context: Option<&CrawlUri>, default: u64) -> u64 {
        self.attribute(key, context)
            .and_then(|v| v.as_integer())
            .and_then(|i| u64::try_from(i).ok())
            .unwrap_or(default)
    }

    fn str_attribute(&self, key: &str, context: Option<&CrawlUri>, default: &str) -> String {
        self.attribute(key, context)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string())
    }
}

struct HostOverride {
    patterns: Vec<HostPattern>,
    table: Table,
}

impl HostOverride {
    fn applies_to(&self, host: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(host))
    }
}

/// Settings backed by the crawl order
///
/// A lookup consults the overrides whose host patterns match the context
/// URI's host, last matching override first, then the global table.
pub struct OrderSettings {
    global: RwLock<Table>,
    overrides: RwLock<Vec<HostOverride>>,
}

impl OrderSettings {
    /// Creates empty settings
    pub fn new() -> Self {
        Self {
            global: RwLock::new(Table::new()),
            overrides: RwLock::new(Vec::new()),
        }
    }

    /// Builds settings from the order's `[settings]` and `[[override]]` tables
    pub fn from_order(order: &CrawlOrder) -> Result<Self, ConfigError> {
        let settings = Self::new();
        *settings.global.write() = order.settings.clone();
        for entry in &order.overrides {
            let hosts: Vec<&str> = entry.hosts.iter().map(String::as_str).collect();
            settings.push_override(&hosts, entry.settings.clone())?;
        }
        Ok(settings)
    }

    /// Sets a global value at runtime
    ///
    /// Call `CrawlController::kick_update` afterwards so components pick up
    /// the change.
    pub fn set_global(&self, key: &str, value: impl Into<Value>) {
        self.global.write().insert(key.to_string(), value.into());
    }

    /// Sets a value for `hosts` at runtime
    pub fn set_override(
        &self,
        hosts: &[&str],
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), ConfigError> {
        let mut table = Table::new();
        table.insert(key.to_string(), value.into());
        self.push_override(hosts, table)
    }

    fn push_override(&self, hosts: &[&str], table: Table) -> Result<(), ConfigError> {
        let patterns = hosts
            .iter()
            .map(|h| HostPattern::parse(h))
            .collect::<Result<Vec<_>, _>>()?;
        self.overrides
            .write()
            .push(HostOverride { patterns, table });
        Ok(())
    }
}

impl Default for OrderSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings for OrderSettings {
    fn attribute(&self, key: &str, context: Option<&CrawlUri>) -> Option<Value> {
        if let Some(curi) = context {
            let host = curi.host();
            let overrides = self.overrides.read();
            for entry in overrides.iter().rev() {
                if entry.applies_to(&host) {
                    if let Some(value) = lookup(&entry.table, key) {
                        return Some(value);
                    }
                }
            }
        }
        lookup(&self.global.read(), key)
    }
}

/// Looks up `key` as a flat key first, then as a dotted path
///
/// `"fetch-http.enabled" = false` and `[settings.fetch-http] enabled = false`
/// are equivalent.
fn lookup(table: &Table, key: &str) -> Option<Value> {
    if let Some(value) = table.get(key) {
        return Some(value.clone());
    }

    let mut parts = key.split('.');
    let mut current = table.get(parts.next()?)?;
    for part in parts {
        current = current.as_table()?.get(part)?;
    }
    Some(current.clone())
}
