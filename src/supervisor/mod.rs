//! Per-job repeat loop
//!
//! A [`JobSupervisor`] drives one job through repeated runs:
//! - RUNNING: one discovery/filter/pipeline pass
//! - SLEEPING: waits out the poll interval, waking early on shutdown
//! - EXITED: terminal, reached through an exit condition or shutdown

mod job;
mod record;
mod shutdown;

pub use job::JobSupervisor;
pub use record::{ExitReason, JobOutcome, JobRunRecord, SupervisorState};
pub use shutdown::ShutdownFlag;
