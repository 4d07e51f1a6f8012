use crate::supervisor::JobOutcome;
use crate::HarvestError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a job failed, as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The job never found anything to collect
    NoFilesFound,
    /// A transient network failure outlasted every retry
    RetriesExhausted,
    /// Setup or protocol failure
    Fatal,
    /// Force-terminated after the grace period
    Terminated,
    /// Still waiting for a pool slot when shutdown was requested
    Cancelled,
}

/// A job that did not complete normally
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("job '{job}' failed ({kind:?}): {message}")]
pub struct JobFailure {
    pub job: String,
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(job: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            job: job.to_string(),
            kind,
            message: message.into(),
        }
    }

    /// Classifies an error a supervisor returned
    pub fn from_error(job: &str, error: &HarvestError) -> Self {
        let kind = match error {
            HarvestError::NoFilesFound { .. } => FailureKind::NoFilesFound,
            e if e.is_transient() => FailureKind::RetriesExhausted,
            _ => FailureKind::Fatal,
        };
        Self::new(job, kind, error.to_string())
    }
}

/// Per-job result returned by the orchestrator
pub type JobResult = std::result::Result<JobOutcome, JobFailure>;

/// The single JSON line a worker process writes to stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub job: String,
    pub result: JobResult,
}

impl WorkerReport {
    /// Finds the report among a worker's stdout lines
    ///
    /// The last line that parses wins; anything else on stdout is ignored.
    pub fn from_output(output: &str) -> Option<Self> {
        output
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
    }
}
