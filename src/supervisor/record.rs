use crate::pipeline::PipelineStatsSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a [`super::JobSupervisor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupervisorState {
    Running,
    Sleeping,
    /// Terminal
    Exited,
}

/// Why a job's repeat loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    LimitReached,
    SinglePassCompleted,
    DayPassedNothingNew,
    Shutdown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitReason::LimitReached => "limit reached",
            ExitReason::SinglePassCompleted => "single pass completed",
            ExitReason::DayPassedNothingNew => "day passed, nothing new",
            ExitReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// One iteration of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunRecord {
    /// 1-based run number
    pub run: u32,
    /// Items admitted by the filters this run
    pub collected: usize,
    pub failed: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub stats: PipelineStatsSnapshot,
}

/// Summary of a job once its loop has exited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job: String,
    pub runs: u32,
    pub collected_total: usize,
    pub failed_runs: u32,
    pub exit_reason: ExitReason,
    /// Pipeline counters summed over every run
    pub stats: PipelineStatsSnapshot,
    pub last_run: Option<JobRunRecord>,
}
