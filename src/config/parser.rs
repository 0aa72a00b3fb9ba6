use crate::config::types::CrawlOrder;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Parses and validates a crawl order from TOML text
///
/// # Arguments
///
/// * `content` - The crawl order as TOML
///
/// # Returns
///
/// * `Ok(CrawlOrder)` - Parsed and validated crawl order
/// * `Err(ConfigError)` - Failed to parse or validate
pub fn parse_order(content: &str) -> Result<CrawlOrder, ConfigError> {
    let order: CrawlOrder = toml::from_str(content)?;
    validate(&order)?;
    Ok(order)
}

/// Loads and parses a crawl order file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML crawl order
///
/// # Returns
///
/// * `Ok(CrawlOrder)` - Successfully loaded and validated crawl order
/// * `Err(ConfigError)` - Failed to load, parse, or validate the order
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use crawl_controller::config::load_order;
///
/// let order = load_order(Path::new("order.toml")).unwrap();
/// println!("Toe threads: {}", order.crawl.max_toe_threads);
/// ```
pub fn load_order(path: &Path) -> Result<CrawlOrder, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut order = parse_order(&content)?;
    order.source_path = Some(path.to_path_buf());
    Ok(order)
}

/// Computes a SHA-256 hash of the crawl order file content
///
/// The hash is recorded in checkpoints so a recovery can tell whether the
/// order changed in between.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_order_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a crawl order and records its hash on it
///
/// # Returns
///
/// * `Ok((CrawlOrder, String))` - The order and the hex hash of its file
/// * `Err(ConfigError)` - Failed to load or parse the order
pub fn load_order_with_hash(path: &Path) -> Result<(CrawlOrder, String), ConfigError> {
    let mut order = load_order(path)?;
    let hash = compute_order_hash(path)?;
    order.source_hash = Some(hash.clone());
    Ok((order, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_order(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID_ORDER: &str = r#"
[crawl]
name = "test-crawl"
max-toe-threads = 3
max-document-download = 100

[disk]
path = "/tmp/crawl-job"

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[scope]
seeds = ["http://example.com/"]
max-hops = 2

[[chain]]
name = "pre-fetch"
[[chain.processor]]
kind = "preselector"

[[chain]]
name = "fetch"
[[chain.processor]]
kind = "fetch-http"
name = "http"
rules = [{ decision = "reject", hosts = ["*.private.example.com"] }]

[settings]
"http.max-length-bytes" = 4096

[[override]]
hosts = ["slow.example.com"]
settings = { "http.enabled" = false }
"#;

    #[test]
    fn test_load_valid_order() {
        let file = create_temp_order(VALID_ORDER);
        let order = load_order(file.path()).unwrap();

        assert_eq!(order.crawl.name, "test-crawl");
        assert_eq!(order.crawl.max_toe_threads, 3);
        assert_eq!(order.crawl.max_document_download, 100);
        assert_eq!(order.crawl.max_retries, 3);
        assert_eq!(order.disk.logs, "logs");
        assert_eq!(order.scope.max_hops, 2);
        assert_eq!(order.chains.len(), 2);
        assert_eq!(order.chains[1].processors[0].stage_name(), "http");
        assert_eq!(order.chains[1].processors[0].rules.len(), 1);
        assert_eq!(order.overrides.len(), 1);
        assert_eq!(order.source_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_job_dirs() {
        let order = parse_order(VALID_ORDER).unwrap();
        assert_eq!(order.logs_dir(), Path::new("/tmp/crawl-job/logs"));
        assert_eq!(
            order.checkpoints_dir(),
            Path::new("/tmp/crawl-job/checkpoints")
        );
    }

    #[test]
    fn test_relative_job_dir_resolves_against_order_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.toml");
        std::fs::write(&path, VALID_ORDER.replace("/tmp/crawl-job", "job")).unwrap();
        let order = load_order(&path).unwrap();
        assert_eq!(order.job_dir(), dir.path().join("job"));
    }

    #[test]
    fn test_load_order_with_invalid_path() {
        let result = load_order(Path::new("/nonexistent/order.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_order_with_invalid_toml() {
        let file = create_temp_order("this is not valid TOML {{{");
        assert!(matches!(load_order(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_order_with_validation_error() {
        let file = create_temp_order(&VALID_ORDER.replace("max-toe-threads = 3", "max-toe-threads = 0"));
        let result = load_order(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_order_with_hash() {
        let file = create_temp_order(VALID_ORDER);
        let (order, hash) = load_order_with_hash(file.path()).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(order.source_hash.as_deref(), Some(hash.as_str()));
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_order("content 1");
        let file2 = create_temp_order("content 2");

        let hash1 = compute_order_hash(file1.path()).unwrap();
        let hash2 = compute_order_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
        assert_eq!(hash1, compute_order_hash(file1.path()).unwrap());
    }
}
