/// Decide rules gating whether a stage processes an item
///
/// Rules are evaluated in order; the last rule whose hosts match the item
/// determines the decision. With no matching rule the item is accepted.
use crate::config::DecideRuleConfig;
use crate::uri::{CrawlUri, HostPattern};
use crate::ConfigError;

/// Outcome of evaluating decide rules against an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::Validation(format!(
                "unknown decision '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct DecideRule {
    decision: Decision,
    /// Empty matches every item
    hosts: Vec<HostPattern>,
}

impl DecideRule {
    fn applies_to(&self, host: &str) -> bool {
        self.hosts.is_empty() || self.hosts.iter().any(|p| p.matches(host))
    }
}

/// An ordered rule sequence
#[derive(Debug, Clone, Default)]
pub struct DecideRules {
    rules: Vec<DecideRule>,
}

impl DecideRules {
    /// Rules that accept everything
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Builds rules from the crawl order
    pub fn from_config(configs: &[DecideRuleConfig]) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .map(|c| {
                Ok(DecideRule {
                    decision: Decision::parse(&c.decision)?,
                    hosts: c
                        .hosts
                        .iter()
                        .map(|h| HostPattern::parse(h))
                        .collect::<Result<_, _>>()?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    /// Adds a rule applying `decision` to items on `hosts`
    pub fn push(&mut self, decision: Decision, hosts: Vec<HostPattern>) {
        self.rules.push(DecideRule { decision, hosts });
    }

    pub fn decide(&self, curi: &CrawlUri) -> Decision {
        let host = curi.host();
        self.rules
            .iter()
            .rev()
            .find(|r| r.applies_to(&host))
            .map(|r| r.decision)
            .unwrap_or(Decision::Accept)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
