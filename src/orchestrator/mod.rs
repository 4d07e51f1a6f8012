//! Bounded fan-out of jobs
//!
//! [`ProcessPoolOrchestrator`] runs every configured job through a
//! [`JobLauncher`], at most `pool_size` at a time, and gathers one
//! [`JobResult`] per job in declaration order. A shutdown request is
//! broadcast to every running job; jobs still alive once the grace period
//! has elapsed are terminated.

mod launcher;
mod report;
mod worker;

pub use launcher::{ConfigJobFactory, InProcessLauncher, JobFactory, JobLauncher, ProcessLauncher};
pub use report::{FailureKind, JobFailure, JobResult, WorkerReport};
pub use worker::run_worker;

use crate::config::Config;
use crate::supervisor::ShutdownFlag;
use crate::{ConfigError, ConfigResult};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Runs a fixed set of jobs with bounded parallelism
pub struct ProcessPoolOrchestrator {
    jobs: Vec<String>,
    pool_size: usize,
    grace: Duration,
    launcher: Arc<dyn JobLauncher>,
    shutdown: ShutdownFlag,
    terminate: ShutdownFlag,
}

impl ProcessPoolOrchestrator {
    /// Creates an orchestrator over `jobs`
    ///
    /// # Returns
    ///
    /// * `Err(ConfigError::Validation)` - `pool_size` is zero
    pub fn new(
        jobs: Vec<String>,
        pool_size: usize,
        grace: Duration,
        launcher: Arc<dyn JobLauncher>,
    ) -> ConfigResult<Self> {
        if pool_size == 0 {
            return Err(ConfigError::Validation(
                "pool-size must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            jobs,
            pool_size,
            grace,
            launcher,
            shutdown: ShutdownFlag::new(),
            terminate: ShutdownFlag::new(),
        })
    }

    /// Orchestrates the enabled jobs of `config`
    pub fn from_config(config: &Config, launcher: Arc<dyn JobLauncher>) -> ConfigResult<Self> {
        let jobs = config.enabled_jobs().map(|job| job.name.clone()).collect();
        Self::new(
            jobs,
            config.orchestrator.pool_size,
            config.orchestrator.grace_period(),
            launcher,
        )
    }

    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// The flag every job observes; setting it is equivalent to [`Self::shutdown`]
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Asks every job to finish at its next poll point
    pub fn shutdown(&self) {
        if self.shutdown.request() {
            info!(grace_secs = self.grace.as_secs(), "Shutdown requested");
        }
    }

    /// Terminates every running job without waiting for the grace period
    pub fn terminate(&self) {
        self.shutdown.request();
        if self.terminate.request() {
            warn!("Termination requested");
        }
    }

    /// Runs all jobs to completion
    ///
    /// Returns one result per job, in the order the jobs were given. A job
    /// that was still waiting for a pool slot when shutdown arrived is
    /// reported as [`FailureKind::Cancelled`] without being launched.
    pub async fn run(&self) -> Vec<(String, JobResult)> {
        info!(jobs = self.jobs.len(), pool_size = self.pool_size, "Orchestrator started");

        let grace_timer = tokio::spawn(grace_timer(
            self.shutdown.clone(),
            self.terminate.clone(),
            self.grace,
        ));

        let semaphore = Arc::new(Semaphore::new(self.pool_size));
        let mut set = JoinSet::new();

        for (index, job) in self.jobs.iter().enumerate() {
            let job = job.clone();
            let semaphore = Arc::clone(&semaphore);
            let launcher = Arc::clone(&self.launcher);
            let shutdown = self.shutdown.clone();
            let terminate = self.terminate.clone();

            set.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = shutdown.wait() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let result = match permit {
                    Some(_permit) => {
                        info!(job = %job, "Job launched");
                        AssertUnwindSafe(launcher.launch(&job, shutdown, terminate))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                Err(JobFailure::new(&job, FailureKind::Fatal, "job panicked"))
                            })
                    }
                    None => Err(JobFailure::new(
                        &job,
                        FailureKind::Cancelled,
                        "shutdown requested before the job started",
                    )),
                };

                (index, result)
            });
        }

        let mut results: Vec<Option<JobResult>> = vec![None; self.jobs.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    log_result(&self.jobs[index], &result);
                    results[index] = Some(result);
                }
                Err(e) => error!(error = %e, "Job slot task failed"),
            }
        }
        grace_timer.abort();

        self.jobs
            .iter()
            .cloned()
            .zip(results)
            .map(|(job, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(JobFailure::new(&job, FailureKind::Fatal, "job produced no result"))
                });
                (job, result)
            })
            .collect()
    }
}

async fn grace_timer(shutdown: ShutdownFlag, terminate: ShutdownFlag, grace: Duration) {
    shutdown.wait().await;
    tokio::time::sleep(grace).await;
    if terminate.request() {
        warn!(grace_secs = grace.as_secs(), "Grace period elapsed, terminating remaining jobs");
    }
}

fn log_result(job: &str, result: &JobResult) {
    match result {
        Ok(outcome) => info!(
            job = %job,
            runs = outcome.runs,
            collected = outcome.collected_total,
            reason = %outcome.exit_reason,
            "Job finished"
        ),
        Err(failure) => warn!(job = %job, kind = ?failure.kind, message = %failure.message, "Job failed"),
    }
}
