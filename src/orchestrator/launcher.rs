//! How jobs get executed
//!
//! The orchestrator hands each job to a [`JobLauncher`] together with two
//! write-once flags: `shutdown` asks the job to wind down at its next poll
//! point, `terminate` demands it stop now.

use super::report::{FailureKind, JobFailure, JobResult, WorkerReport};
use crate::adapter::build_http_client;
use crate::config::Config;
use crate::supervisor::{JobSupervisor, ShutdownFlag};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Runs one job to completion
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, job: &str, shutdown: ShutdownFlag, terminate: ShutdownFlag) -> JobResult;
}

/// Builds ready-to-run supervisors by job name
pub trait JobFactory: Send + Sync {
    fn build(&self, job: &str, shutdown: ShutdownFlag) -> Result<JobSupervisor>;
}

/// Builds supervisors from the loaded configuration
///
/// Jobs sharing a `lock-group` receive the same lock handle. Handles live in
/// this factory, so the grouping holds among the jobs it builds.
pub struct ConfigJobFactory {
    config: Arc<Config>,
    client: reqwest::Client,
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl ConfigJobFactory {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = build_http_client()
            .map_err(|e| HarvestError::Adapter(format!("failed to build HTTP client: {}", e)))?;

        let mut locks = HashMap::new();
        for group in config.jobs.iter().filter_map(|job| job.lock_group.as_ref()) {
            locks
                .entry(group.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())));
        }

        Ok(Self {
            config,
            client,
            locks,
        })
    }

    /// The shared lock for a group, if any job declares it
    pub fn lock_for(&self, group: &str) -> Option<Arc<Mutex<()>>> {
        self.locks.get(group).cloned()
    }
}

impl JobFactory for ConfigJobFactory {
    fn build(&self, job: &str, shutdown: ShutdownFlag) -> Result<JobSupervisor> {
        let job_config = self
            .config
            .job(job)
            .ok_or_else(|| HarvestError::Worker(format!("unknown job '{}'", job)))?;

        let supervisor =
            JobSupervisor::from_config(&self.config, job_config, self.client.clone(), shutdown)?;

        Ok(match job_config.lock_group.as_deref().and_then(|g| self.lock_for(g)) {
            Some(lock) => supervisor.with_lock(lock),
            None => supervisor,
        })
    }
}

/// Runs each job as a task inside the current process
///
/// Jobs share the orchestrator's shutdown flag directly. Termination aborts
/// the task.
pub struct InProcessLauncher {
    factory: Arc<dyn JobFactory>,
}

impl InProcessLauncher {
    pub fn new(factory: Arc<dyn JobFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl JobLauncher for InProcessLauncher {
    async fn launch(&self, job: &str, shutdown: ShutdownFlag, terminate: ShutdownFlag) -> JobResult {
        let mut supervisor = self
            .factory
            .build(job, shutdown)
            .map_err(|e| JobFailure::from_error(job, &e))?;

        let mut task = tokio::spawn(async move { supervisor.run().await });

        tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(e)) => Err(JobFailure::from_error(job, &e)),
                Err(e) => Err(JobFailure::new(job, FailureKind::Fatal, format!("job task failed: {}", e))),
            },
            _ = terminate.wait() => {
                task.abort();
                warn!(job = %job, "Job task aborted");
                Err(JobFailure::new(job, FailureKind::Terminated, "aborted after grace period"))
            }
        }
    }
}

/// Runs each job in a child process
///
/// The child is this executable's `worker` subcommand. Shutdown is
/// forwarded as a `shutdown` line on the child's stdin; termination kills
/// the child. The child answers with one [`WorkerReport`] line on stdout.
pub struct ProcessLauncher {
    exe: PathBuf,
    config_path: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(exe: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            config_path: config_path.into(),
            args: Vec::new(),
        }
    }

    /// Launcher re-executing the running binary
    pub fn current(config_path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, config_path))
    }

    /// Extra arguments placed before the subcommand (for example `-v`)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch(&self, job: &str, shutdown: ShutdownFlag, terminate: ShutdownFlag) -> JobResult {
        let spawned = Command::new(&self.exe)
            .args(&self.args)
            .arg("worker")
            .arg(&self.config_path)
            .arg("--job")
            .arg(job)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn();

        let mut child = spawned.map_err(|e| {
            JobFailure::new(job, FailureKind::Fatal, format!("failed to spawn worker: {}", e))
        })?;
        debug!(job = %job, pid = ?child.id(), "Worker process spawned");

        let mut stdin = child.stdin.take();
        let mut stdout = child.stdout.take();
        let reader = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stdout) = stdout.as_mut() {
                if let Err(e) = stdout.read_to_string(&mut output).await {
                    warn!(error = %e, "Failed to read worker output");
                }
            }
            output
        });

        let mut forwarded = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = shutdown.wait(), if !forwarded => {
                    forwarded = true;
                    if let Some(pipe) = stdin.as_mut() {
                        // The worker may already be gone
                        let _ = pipe.write_all(b"shutdown\n").await;
                        let _ = pipe.flush().await;
                    }
                    debug!(job = %job, "Shutdown forwarded to worker");
                }
                _ = terminate.wait() => {
                    if let Err(e) = child.kill().await {
                        warn!(job = %job, error = %e, "Failed to kill worker");
                    }
                    warn!(job = %job, "Worker process killed");
                    return Err(JobFailure::new(job, FailureKind::Terminated, "killed after grace period"));
                }
            }
        };
        drop(stdin);

        let output = reader.await.unwrap_or_default();
        match WorkerReport::from_output(&output) {
            Some(report) => {
                info!(job = %job, ok = report.result.is_ok(), "Worker reported");
                report.result
            }
            None => {
                let status = status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|e| e.to_string());
                Err(JobFailure::new(
                    job,
                    FailureKind::Fatal,
                    format!("worker exited ({}) without a report", status),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Arc<Config> {
        let toml = format!(
            r#"
[output]
storage-dir = "{root}/files"
seen-db = "{root}/seen.db"

[[job]]
name = "alpha"
lock-group = "mirror"
[job.source]
kind = "single-page-html"
url = "https://example.com/a/"
pattern = "\\.nc$"

[[job]]
name = "beta"
lock-group = "mirror"
[job.source]
kind = "single-page-html"
url = "https://example.com/b/"
pattern = "\\.nc$"

[[job]]
name = "gamma"
[job.source]
kind = "single-page-html"
url = "https://example.com/c/"
pattern = "\\.nc$"
"#,
            root = dir.path().display()
        );
        Arc::new(parse_config(&toml).unwrap())
    }

    #[test]
    fn test_lock_groups_share_one_handle() {
        let dir = TempDir::new().unwrap();
        let factory = ConfigJobFactory::new(config(&dir)).unwrap();

        let a = factory.lock_for("mirror").unwrap();
        let b = factory.lock_for("mirror").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(factory.lock_for("other").is_none());
    }

    #[test]
    fn test_factories_do_not_share_locks() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let first = ConfigJobFactory::new(Arc::clone(&cfg)).unwrap();
        let second = ConfigJobFactory::new(cfg).unwrap();

        assert!(!Arc::ptr_eq(
            &first.lock_for("mirror").unwrap(),
            &second.lock_for("mirror").unwrap()
        ));
    }

    #[tokio::test]
    async fn test_factory_builds_known_jobs_only() {
        let dir = TempDir::new().unwrap();
        let factory = ConfigJobFactory::new(config(&dir)).unwrap();

        let supervisor = factory.build("gamma", ShutdownFlag::new()).unwrap();
        assert_eq!(supervisor.name(), "gamma");

        assert!(matches!(
            factory.build("delta", ShutdownFlag::new()),
            Err(HarvestError::Worker(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_worker_binary_is_fatal() {
        let launcher = ProcessLauncher::new("/nonexistent/sumi-harvest", "/tmp/harvest.toml");
        let result = launcher
            .launch("gamma", ShutdownFlag::new(), ShutdownFlag::new())
            .await;
        assert!(matches!(result, Err(JobFailure { kind: FailureKind::Fatal, .. })));
    }
}
