use crate::ConfigError;
use std::fmt;

/// A host pattern from the crawl order
///
/// Two forms are supported:
/// 1. Exact: `example.com` matches only `example.com`
/// 2. Wildcard: `*.example.com` matches `example.com` and any subdomain
///    of it, however deep
///
/// Patterns and hosts are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern {
    base: String,
    wildcard: bool,
}

impl HostPattern {
    /// Parses and validates a host pattern
    ///
    /// # Arguments
    ///
    /// * `pattern` - Pattern text, optionally starting with `*.`
    ///
    /// # Returns
    ///
    /// * `Ok(HostPattern)` - A valid pattern
    /// * `Err(ConfigError::InvalidPattern)` - Empty or malformed pattern
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let lowered = pattern.trim().to_lowercase();
        let (base, wildcard) = match lowered.strip_prefix("*.") {
            Some(base) => (base.to_string(), true),
            None => (lowered, false),
        };
        validate_host(&base)?;
        Ok(Self { base, wildcard })
    }

    /// Returns true if `host` matches this pattern
    pub fn matches(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        if self.wildcard {
            host == self.base || host.ends_with(&format!(".{}", self.base))
        } else {
            host == self.base
        }
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.wildcard {
            write!(f, "*.{}", self.base)
        } else {
            write!(f, "{}", self.base)
        }
    }
}

/// Returns true if any of `patterns` matches `host`
pub fn matches_any(patterns: &[HostPattern], host: &str) -> bool {
    patterns.iter().any(|p| p.matches(host))
}

fn validate_host(host: &str) -> Result<(), ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Host pattern cannot be empty".to_string(),
        ));
    }

    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' contains invalid characters",
            host
        )));
    }

    if host.starts_with('.') || host.ends_with('.') || host.starts_with('-') || host.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' cannot start or end with '.' or '-'",
            host
        )));
    }

    if host.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Host '{}' cannot contain consecutive dots",
            host
        )));
    }

    Ok(())
}
