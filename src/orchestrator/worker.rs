//! Child side of [`super::ProcessLauncher`]

use super::launcher::{ConfigJobFactory, JobFactory};
use super::report::{JobFailure, WorkerReport};
use crate::config::Config;
use crate::supervisor::ShutdownFlag;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Runs a single job inside a worker process
///
/// A `shutdown` line on stdin, stdin closing, or Ctrl-C requests shutdown.
/// The caller prints the returned report as one JSON line on stdout.
///
/// Reading stdin parks a blocking thread, so the caller should exit the
/// process once the report is written instead of waiting for the runtime
/// to wind down.
pub async fn run_worker(config: Arc<Config>, job: &str) -> WorkerReport {
    let shutdown = ShutdownFlag::new();
    tokio::spawn(watch_stdin(shutdown.clone()));
    tokio::spawn(watch_ctrl_c(shutdown.clone()));

    let result = match ConfigJobFactory::new(config).and_then(|f| f.build(job, shutdown)) {
        Ok(mut supervisor) => supervisor
            .run()
            .await
            .map_err(|e| JobFailure::from_error(job, &e)),
        Err(e) => Err(JobFailure::from_error(job, &e)),
    };

    WorkerReport {
        job: job.to_string(),
        result,
    }
}

async fn watch_stdin(shutdown: ShutdownFlag) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim() == "shutdown" => break,
            Ok(Some(line)) => debug!(line = %line, "Ignoring unknown control line"),
            Ok(None) | Err(_) => break,
        }
    }
    if shutdown.request() {
        info!("Shutdown requested by orchestrator");
    }
}

async fn watch_ctrl_c(shutdown: ShutdownFlag) {
    if tokio::signal::ctrl_c().await.is_ok() && shutdown.request() {
        info!("Shutdown requested by signal");
    }
}
