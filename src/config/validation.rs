use crate::config::types::{ChainConfig, CrawlOrder, CrawlSection, ScopeConfig, UserAgentConfig};
use crate::uri::HostPattern;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Upper bound on worker threads
pub const MAX_TOE_THREADS: usize = 500;

/// Validates the entire crawl order
pub fn validate(order: &CrawlOrder) -> Result<(), ConfigError> {
    validate_crawl_section(&order.crawl)?;
    validate_user_agent_config(&order.user_agent)?;
    validate_scope(&order.scope)?;
    validate_chains(&order.chains)?;
    for entry in &order.overrides {
        for host in &entry.hosts {
            HostPattern::parse(host)?;
        }
    }
    Ok(())
}

fn validate_crawl_section(crawl: &CrawlSection) -> Result<(), ConfigError> {
    if crawl.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crawl name cannot be empty".to_string(),
        ));
    }

    if crawl.max_toe_threads < 1 || crawl.max_toe_threads > MAX_TOE_THREADS {
        return Err(ConfigError::Validation(format!(
            "max-toe-threads must be between 1 and {}, got {}",
            MAX_TOE_THREADS, crawl.max_toe_threads
        )));
    }

    if crawl.progress_interval_sec == 0 {
        return Err(ConfigError::Validation(
            "progress-interval-sec must be >= 1".to_string(),
        ));
    }

    if crawl.next_poll_ms == 0 {
        return Err(ConfigError::Validation(
            "next-poll-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    validate_email(&config.contact_email)
}

fn validate_scope(scope: &ScopeConfig) -> Result<(), ConfigError> {
    for seed in &scope.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed '{}' must use http or https",
                seed
            )));
        }
    }

    for host in &scope.allowed_hosts {
        HostPattern::parse(host)?;
    }

    Ok(())
}

fn validate_chains(chains: &[ChainConfig]) -> Result<(), ConfigError> {
    if chains.iter().all(|c| c.processors.is_empty()) {
        return Err(ConfigError::Validation(
            "No processors defined".to_string(),
        ));
    }

    let mut chain_names = HashSet::new();
    let mut stage_names = HashSet::new();
    for chain in chains {
        if !chain_names.insert(chain.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate chain name '{}'",
                chain.name
            )));
        }

        for processor in &chain.processors {
            if !stage_names.insert(processor.stage_name()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate processor name '{}'",
                    processor.stage_name()
                )));
            }

            for rule in &processor.rules {
                if rule.decision != "accept" && rule.decision != "reject" {
                    return Err(ConfigError::Validation(format!(
                        "processor '{}': unknown decision '{}' (expected accept or reject)",
                        processor.stage_name(),
                        rule.decision
                    )));
                }
                for host in &rule.hosts {
                    HostPattern::parse(host)?;
                }
            }
        }
    }

    Ok(())
}

fn validate_email(email: &str) -> Result<(), ConfigError> {
    let (local, domain) = email.split_once('@').ok_or_else(|| {
        ConfigError::Validation(format!("Invalid contact-email format: '{}'", email))
    })?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid contact-email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid contact-email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DecideRuleConfig, ProcessorConfig};

    fn processor(kind: &str, name: Option<&str>) -> ProcessorConfig {
        ProcessorConfig {
            kind: kind.to_string(),
            name: name.map(str::to_string),
            rules: vec![],
        }
    }

    fn chain(name: &str, processors: Vec<ProcessorConfig>) -> ChainConfig {
        ChainConfig {
            name: name.to_string(),
            processors,
        }
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = validate_chains(&[chain("fetch", vec![])]).unwrap_err();
        assert!(err.to_string().contains("No processors defined"));
        assert!(validate_chains(&[]).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dup_chain = vec![
            chain("a", vec![processor("preselector", None)]),
            chain("a", vec![processor("fetch-http", None)]),
        ];
        assert!(validate_chains(&dup_chain).is_err());

        let dup_stage = vec![chain(
            "a",
            vec![processor("fetch-http", None), processor("preselector", Some("fetch-http"))],
        )];
        assert!(validate_chains(&dup_stage).is_err());
    }

    #[test]
    fn test_unknown_decision_rejected() {
        let mut p = processor("preselector", None);
        p.rules.push(DecideRuleConfig {
            decision: "maybe".to_string(),
            hosts: vec![],
        });
        assert!(validate_chains(&[chain("a", vec![p])]).is_err());
    }

    #[test]
    fn test_seed_scheme() {
        let mut scope = ScopeConfig::default();
        scope.seeds.push("ftp://example.com/".to_string());
        assert!(validate_scope(&scope).is_err());

        scope.seeds = vec!["http://127.0.0.1:8080/".to_string()];
        assert!(validate_scope(&scope).is_ok());
    }
}
