//! Sumi-Harvest: a polite periodic data-file collector
//!
//! This crate runs a fixed set of collection jobs, each bound to one site
//! adapter. Every job is driven through the same core: a stateful filter
//! chain, a staged streaming pipeline with bounded queues, a retry executor
//! for flaky network calls, and a supervisor that repeats the job until one
//! of its exit conditions holds.

pub mod adapter;
pub mod config;
pub mod filter;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod storage;
pub mod supervisor;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Sumi-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transient network error ({kind:?}) for {target}: {message}")]
    Network {
        target: String,
        kind: TransientKind,
        message: String,
    },

    #[error("Attempt timed out after {after:?}")]
    AttemptTimeout { after: Duration },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("No files found for job '{job}'")]
    NoFilesFound { job: String },

    #[error("Stage {stage:?} failed: {message}")]
    Stage {
        stage: pipeline::Stage,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("FTP error for {target}: {message}")]
    Ftp { target: String, message: String },

    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl HarvestError {
    /// Whether the error belongs to the known set of transient network failures
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::AttemptTimeout { .. } => true,
            Self::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Builds a `Network` error from a reqwest failure, or a permanent
    /// adapter error when reqwest reports something non-transient
    pub fn from_reqwest(target: &str, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            Some(TransientKind::Timeout)
        } else if err.is_connect() {
            Some(TransientKind::Connect)
        } else if err.is_body() || err.is_decode() {
            Some(TransientKind::Body)
        } else if err.is_request() {
            Some(TransientKind::Reset)
        } else {
            None
        };

        match (kind, err.status()) {
            (_, Some(status)) => Self::HttpStatus {
                url: target.to_string(),
                status: status.as_u16(),
            },
            (Some(kind), None) => Self::Network {
                target: target.to_string(),
                kind,
                message: err.to_string(),
            },
            (None, None) => Self::Adapter(format!("{}: {}", target, err)),
        }
    }
}

/// The enumerable set of transient network failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    Connect,
    Reset,
    Body,
    FtpConnection,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use adapter::{Adapter, Download, Item, SiteAdapter};
pub use config::Config;
pub use filter::{FilterPipeline, FilterState};
pub use orchestrator::ProcessPoolOrchestrator;
pub use pipeline::{BoundedQueue, PipelineStats, StreamingPipeline};
pub use retry::{RetryExecutor, RetryPolicy};
pub use supervisor::{JobSupervisor, ShutdownFlag};
