use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A crawl order: everything needed to set up and run one crawl job
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlOrder {
    pub crawl: CrawlSection,
    #[serde(default)]
    pub disk: DiskSection,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    /// Ordered processor chains making up the pipeline
    #[serde(default, rename = "chain")]
    pub chains: Vec<ChainConfig>,
    /// Global settings, `"<processor>.<attribute>" = value`
    #[serde(default)]
    pub settings: toml::Table,
    /// Per-host setting overrides; later entries win
    #[serde(default, rename = "override")]
    pub overrides: Vec<OverrideConfig>,

    /// File the order was loaded from, if any
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
    /// Hex SHA-256 of the order file, if loaded with a hash
    #[serde(skip)]
    pub source_hash: Option<String>,
}

impl CrawlOrder {
    /// The job directory
    ///
    /// A relative `disk.path` is resolved against the directory holding the
    /// order file.
    pub fn job_dir(&self) -> PathBuf {
        let path = Path::new(&self.disk.path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.source_path.as_ref().and_then(|p| p.parent()) {
            Some(parent) => parent.join(path),
            None => path.to_path_buf(),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.job_dir().join(&self.disk.logs)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.job_dir().join(&self.disk.checkpoints)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.job_dir().join(&self.disk.state)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.job_dir().join(&self.disk.scratch)
    }

    /// The `User-Agent` header value
    pub fn user_agent_string(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.user_agent.crawler_name,
            self.user_agent.crawler_version,
            self.user_agent.contact_url,
            self.user_agent.contact_email
        )
    }
}

/// Crawl-wide limits and behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlSection {
    /// Name of the crawl job
    pub name: String,

    /// Number of worker threads
    #[serde(default = "default_toe_threads")]
    pub max_toe_threads: usize,

    /// Stop after this many downloaded bytes (0 = unlimited)
    #[serde(default)]
    pub max_bytes_download: u64,

    /// Stop after this many successfully fetched documents (0 = unlimited)
    #[serde(default)]
    pub max_document_download: u64,

    /// Stop after this many seconds of crawling (0 = unlimited)
    #[serde(default)]
    pub max_time_sec: u64,

    /// Pause immediately after starting
    #[serde(default)]
    pub pause_at_start: bool,

    /// Pause rather than stop when the crawl would finish
    #[serde(default)]
    pub pause_at_finish: bool,

    /// Attempts for retryable failures before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before a retryable item is handed out again (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Seconds between progress statistics lines
    #[serde(default = "default_progress_interval")]
    pub progress_interval_sec: u64,

    /// How long a worker waits for work before re-checking its flags
    /// (milliseconds)
    #[serde(default = "default_next_poll_ms")]
    pub next_poll_ms: u64,
}

fn default_toe_threads() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_progress_interval() -> u64 {
    20
}

fn default_next_poll_ms() -> u64 {
    200
}

/// Job directory layout
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiskSection {
    #[serde(default = "default_job_path")]
    pub path: String,
    #[serde(default = "default_logs")]
    pub logs: String,
    #[serde(default = "default_checkpoints")]
    pub checkpoints: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_scratch")]
    pub scratch: String,
    /// Name of a checkpoint (under `checkpoints`) to resume from
    #[serde(default)]
    pub recover_checkpoint: Option<String>,
    /// Recover journal to import at startup
    #[serde(default)]
    pub recover_log: Option<String>,
    /// Re-queue failed URIs found in the recover journal
    #[serde(default)]
    pub recover_retain_failures: bool,
}

impl Default for DiskSection {
    fn default() -> Self {
        Self {
            path: default_job_path(),
            logs: default_logs(),
            checkpoints: default_checkpoints(),
            state: default_state(),
            scratch: default_scratch(),
            recover_checkpoint: None,
            recover_log: None,
            recover_retain_failures: false,
        }
    }
}

fn default_job_path() -> String {
    ".".to_string()
}

fn default_logs() -> String {
    "logs".to_string()
}

fn default_checkpoints() -> String {
    "checkpoints".to_string()
}

fn default_state() -> String {
    "state".to_string()
}

fn default_scratch() -> String {
    "scratch".to_string()
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Seeds and scope limits
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScopeConfig {
    #[serde(default)]
    pub seeds: Vec<String>,
    /// Host patterns in scope; empty means the hosts of the seeds
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Maximum followed-link hops from a seed (0 = unlimited)
    #[serde(default)]
    pub max_hops: usize,
}

/// One processor chain of the pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    #[serde(default, rename = "processor")]
    pub processors: Vec<ProcessorConfig>,
}

/// One stage of a chain
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Registered processor kind, e.g. `fetch-http`
    pub kind: String,
    /// Stage name used for settings keys; defaults to the kind
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rules: Vec<DecideRuleConfig>,
}

impl ProcessorConfig {
    pub fn stage_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }
}

/// A decide rule: `decision` applies to items whose host matches `hosts`
/// (all items when `hosts` is empty)
#[derive(Debug, Clone, Deserialize)]
pub struct DecideRuleConfig {
    pub decision: String,
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Settings that apply to a set of hosts
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideConfig {
    pub hosts: Vec<String>,
    #[serde(default)]
    pub settings: toml::Table,
}
