use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
}

impl Config {
    /// Jobs with `enabled = true`, in declaration order
    pub fn enabled_jobs(&self) -> impl Iterator<Item = &JobConfig> {
        self.jobs.iter().filter(|job| job.enabled)
    }

    /// Looks up a job by name
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.name == name)
    }
}

/// How jobs are fanned out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchMode {
    /// One worker process per job
    #[default]
    Process,
    /// One tokio task per job inside the current process
    InProcess,
}

/// Process pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs running at once
    #[serde(rename = "pool-size", default = "default_pool_size")]
    pub pool_size: usize,

    /// Default delay between runs of a job (seconds)
    #[serde(rename = "poll-interval-secs", default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Time jobs get to exit after a shutdown request before being terminated
    #[serde(rename = "grace-period-secs", default = "default_grace_period")]
    pub grace_period_secs: u64,

    #[serde(default)]
    pub mode: LaunchMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            poll_interval_secs: default_poll_interval(),
            grace_period_secs: default_grace_period(),
            mode: LaunchMode::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Streaming pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(rename = "process-workers", default = "default_one")]
    pub process_workers: usize,

    #[serde(rename = "download-workers", default = "default_download_workers")]
    pub download_workers: usize,

    #[serde(rename = "storage-workers", default = "default_one")]
    pub storage_workers: usize,

    /// Capacity of every inter-stage queue
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long an idle worker waits on its queue before re-checking state (milliseconds)
    #[serde(rename = "poll-timeout-ms", default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Upper bound on how long `stop()` waits for each worker (seconds)
    #[serde(rename = "join-timeout-secs", default = "default_join_timeout")]
    pub join_timeout_secs: u64,

    /// Delay before re-offering an item to a full discovery queue (milliseconds)
    #[serde(rename = "enqueue-retry-ms", default = "default_enqueue_retry_ms")]
    pub enqueue_retry_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            process_workers: default_one(),
            download_workers: default_download_workers(),
            storage_workers: default_one(),
            queue_capacity: default_queue_capacity(),
            poll_timeout_ms: default_poll_timeout_ms(),
            join_timeout_secs: default_join_timeout(),
            enqueue_retry_ms: default_enqueue_retry_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn enqueue_retry(&self) -> Duration {
        Duration::from_millis(self.enqueue_retry_ms)
    }
}

/// Retry/backoff configuration for network operations
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_tries")]
    pub tries: u32,

    #[serde(rename = "initial-delay-ms", default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff")]
    pub backoff: f64,

    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(rename = "initial-timeout-secs", default = "default_initial_timeout")]
    pub initial_timeout_secs: u64,

    #[serde(rename = "timeout-increment-secs", default = "default_timeout_increment")]
    pub timeout_increment_secs: u64,

    #[serde(rename = "max-timeout-secs", default = "default_max_timeout")]
    pub max_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            tries: default_tries(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff: default_backoff(),
            max_delay_ms: default_max_delay_ms(),
            initial_timeout_secs: default_initial_timeout(),
            timeout_increment_secs: default_timeout_increment(),
            max_timeout_secs: default_max_timeout(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Root directory downloaded files are written under
    #[serde(rename = "storage-dir")]
    pub storage_dir: String,

    /// Path to the SQLite database recording completed downloads
    #[serde(rename = "seen-db")]
    pub seen_db: String,
}

/// One collection job
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cap on admitted items (per category when categories are given)
    #[serde(default)]
    pub limit: Option<usize>,

    /// Category tags to keep; empty keeps everything
    #[serde(default)]
    pub categories: Vec<String>,

    /// Exit after the first run
    #[serde(rename = "single-pass", default)]
    pub single_pass: bool,

    /// Once this date has passed, a run that collects nothing ends the job
    #[serde(rename = "target-date", default)]
    pub target_date: Option<NaiveDate>,

    /// Overrides `orchestrator.poll-interval-secs`
    #[serde(rename = "poll-interval-secs", default)]
    pub poll_interval_secs: Option<u64>,

    /// Items larger than this (bytes) are skipped
    #[serde(rename = "max-file-size", default)]
    pub max_file_size: Option<u64>,

    /// Jobs sharing a lock group never run concurrently within one process
    #[serde(rename = "lock-group", default)]
    pub lock_group: Option<String>,

    /// An empty discovery result is normal for this source
    #[serde(rename = "empty-expected", default)]
    pub empty_expected: bool,

    pub source: SourceConfig,
}

/// Discovery source shapes shared by the concrete sites
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceConfig {
    SinglePageHtml {
        url: String,
        pattern: String,
        #[serde(default = "default_selector")]
        selector: String,
    },
    PaginatedHtml {
        #[serde(rename = "url-template")]
        url_template: String,
        pattern: String,
        #[serde(default = "default_selector")]
        selector: String,
        #[serde(rename = "first-page", default = "default_first_page")]
        first_page: u32,
        #[serde(rename = "max-pages", default = "default_max_pages")]
        max_pages: u32,
    },
    FtpListing {
        host: String,
        #[serde(default = "default_ftp_port")]
        port: u16,
        #[serde(default = "default_ftp_user")]
        username: String,
        #[serde(default = "default_ftp_password")]
        password: String,
        directory: String,
        pattern: String,
    },
}

impl SourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SinglePageHtml { .. } => "single-page-html",
            Self::PaginatedHtml { .. } => "paginated-html",
            Self::FtpListing { .. } => "ftp-listing",
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Self::SinglePageHtml { pattern, .. }
            | Self::PaginatedHtml { pattern, .. }
            | Self::FtpListing { pattern, .. } => pattern,
        }
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    300
}

fn default_grace_period() -> u64 {
    10
}

fn default_one() -> usize {
    1
}

fn default_download_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    100
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_join_timeout() -> u64 {
    5
}

fn default_enqueue_retry_ms() -> u64 {
    50
}

fn default_tries() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_backoff() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_initial_timeout() -> u64 {
    30
}

fn default_timeout_increment() -> u64 {
    15
}

fn default_max_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_selector() -> String {
    "a[href]".to_string()
}

fn default_first_page() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    50
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ftp_user() -> String {
    "anonymous".to_string()
}

fn default_ftp_password() -> String {
    "anonymous@".to_string()
}
