use super::record::{ExitReason, JobOutcome, JobRunRecord, SupervisorState};
use super::shutdown::ShutdownFlag;
use crate::adapter::{Adapter, Item, SiteAdapter};
use crate::config::{Config, JobConfig, PipelineConfig, RetryConfig};
use crate::filter::{FilterPipeline, FilterState, Verdict};
use crate::pipeline::{PipelineStatsSnapshot, StreamingPipeline};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::storage::{open_job_stores, SeenStore, StorageBackend};
use crate::{HarvestError, Result};
use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Longest uninterrupted sleep between shutdown checks
const SLEEP_SLICE: Duration = Duration::from_secs(1);

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Repeats one job until an exit condition holds
///
/// Each run streams the adapter's discovery through the filter chain into
/// a fresh [`StreamingPipeline`]. Between runs the supervisor sleeps for the
/// poll interval, waking early on shutdown.
pub struct JobSupervisor {
    job: JobConfig,
    adapter: Arc<dyn SiteAdapter>,
    filter: FilterPipeline,
    storage: Arc<dyn StorageBackend>,
    seen: Arc<dyn SeenStore>,
    pipeline_config: PipelineConfig,
    retry: RetryExecutor,
    poll_interval: Duration,
    shutdown: ShutdownFlag,
    lock: Option<Arc<Mutex<()>>>,
    clock: fn() -> NaiveDate,
    state: SupervisorState,
}

impl JobSupervisor {
    /// Creates a supervisor with default pipeline and retry settings
    ///
    /// # Returns
    ///
    /// * `Err(HarvestError::Config)` - The job's limit is zero
    pub fn new(
        job: JobConfig,
        adapter: Arc<dyn SiteAdapter>,
        storage: Arc<dyn StorageBackend>,
        seen: Arc<dyn SeenStore>,
        shutdown: ShutdownFlag,
    ) -> Result<Self> {
        let filter = FilterPipeline::from_job(&job, Arc::clone(&seen))?;
        let retry = RetryExecutor::new(RetryPolicy::from_config(&RetryConfig::default())?);
        let poll_interval = Duration::from_secs(job.poll_interval_secs.unwrap_or(300));

        Ok(Self {
            job,
            adapter,
            filter,
            storage,
            seen,
            pipeline_config: PipelineConfig::default(),
            retry,
            poll_interval,
            shutdown,
            lock: None,
            clock: today,
            state: SupervisorState::Running,
        })
    }

    /// Wires a supervisor for `job` from the full configuration
    ///
    /// Builds the job's adapter and opens its storage and seen-store.
    pub fn from_config(
        config: &Config,
        job: &JobConfig,
        client: reqwest::Client,
        shutdown: ShutdownFlag,
    ) -> Result<Self> {
        let retry = RetryExecutor::new(RetryPolicy::from_config(&config.retry)?);
        let adapter = Adapter::from_job(job, client, retry.clone())?;
        let (storage, seen) = open_job_stores(&config.output, &job.name)?;
        let poll_secs = job
            .poll_interval_secs
            .unwrap_or(config.orchestrator.poll_interval_secs);

        Ok(Self::new(job.clone(), Arc::new(adapter), storage, seen, shutdown)?
            .with_pipeline_config(config.pipeline.clone())
            .with_retry(retry)
            .with_poll_interval(Duration::from_secs(poll_secs)))
    }

    pub fn with_pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = config;
        self
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Serializes runs with every other holder of `lock`
    pub fn with_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Replaces the calendar used for the target-date exit condition
    pub fn with_clock(mut self, clock: fn() -> NaiveDate) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Runs the job until it exits
    ///
    /// # Returns
    ///
    /// * `Ok(JobOutcome)` - The loop exited; failed runs are counted in the outcome
    /// * `Err(e)` - The job exited without collecting anything in any run and
    ///   its final run failed with `NoFilesFound` or a transient error that
    ///   outlasted every retry
    pub async fn run(&mut self) -> Result<JobOutcome> {
        if self.state == SupervisorState::Exited {
            return Err(HarvestError::Worker(format!(
                "job '{}' has already exited",
                self.job.name
            )));
        }

        info!(job = %self.job.name, source = self.job.source.kind(), "Job started");

        let mut filter_state = FilterState::new();
        let mut runs = 0u32;
        let mut collected_total = 0usize;
        let mut failed_runs = 0u32;
        let mut stats = PipelineStatsSnapshot::default();
        let mut last_run = None;
        let mut last_error = None;

        let exit_reason = loop {
            if self.shutdown.is_set() {
                break ExitReason::Shutdown;
            }

            self.state = SupervisorState::Running;
            runs += 1;
            let (record, error) = self.run_once(&mut filter_state, runs).await;

            collected_total += record.collected;
            stats += record.stats;
            if record.failed {
                failed_runs += 1;
            }
            let collected = record.collected;
            last_run = Some(record);
            last_error = error;

            if let Some(reason) = self.exit_condition(&filter_state, collected) {
                break reason;
            }

            self.state = SupervisorState::Sleeping;
            self.sleep_until_next_poll().await;
        };

        self.state = SupervisorState::Exited;
        if let Err(e) = self.storage.close().await {
            warn!(job = %self.job.name, error = %e, "Failed to close storage");
        }

        info!(
            job = %self.job.name,
            runs,
            collected = collected_total,
            failed_runs,
            reason = %exit_reason,
            "Job exited"
        );

        // Only an empty result or exhausted retries escape the job
        if exit_reason != ExitReason::Shutdown && collected_total == 0 {
            if let Some(error) = last_error {
                if matches!(error, HarvestError::NoFilesFound { .. }) || error.is_transient() {
                    return Err(error);
                }
            }
        }

        Ok(JobOutcome {
            job: self.job.name.clone(),
            runs,
            collected_total,
            failed_runs,
            exit_reason,
            stats,
            last_run,
        })
    }

    fn exit_condition(&self, state: &FilterState, collected: usize) -> Option<ExitReason> {
        if let Some(limit) = self.job.limit {
            if state.file_pass_limit() >= limit {
                return Some(ExitReason::LimitReached);
            }
        }

        if self.job.single_pass {
            return Some(ExitReason::SinglePassCompleted);
        }

        if let Some(target) = self.job.target_date {
            if (self.clock)() > target && collected == 0 {
                return Some(ExitReason::DayPassedNothingNew);
            }
        }

        None
    }

    async fn sleep_until_next_poll(&self) {
        let deadline = Instant::now() + self.poll_interval;
        debug!(job = %self.job.name, secs = self.poll_interval.as_secs(), "Sleeping until next poll");

        while !self.shutdown.is_set() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let slice = (deadline - now).min(SLEEP_SLICE);
            tokio::select! {
                _ = tokio::time::sleep(slice) => {}
                _ = self.shutdown.wait() => break,
            }
        }
    }

    /// One iteration: discover, filter, and drain the pipeline
    async fn run_once(
        &self,
        state: &mut FilterState,
        run: u32,
    ) -> (JobRunRecord, Option<HarvestError>) {
        let started = Instant::now();

        let _held = match &self.lock {
            Some(lock) => {
                trace!(job = %self.job.name, "Waiting for lock group");
                Some(lock.lock().await)
            }
            None => None,
        };

        state.begin_run();
        let (result, stats) = self.collect(state).await;

        // Admitted items count even when discovery failed partway
        let collected = state.post_limit();
        let error = result.err();

        let record = JobRunRecord {
            run,
            collected,
            failed: error.is_some(),
            error: error.as_ref().map(|e| e.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            stats,
        };

        match &error {
            None => info!(
                job = %self.job.name,
                run,
                collected,
                stored = stats.stored,
                errors = stats.errors,
                "Run finished"
            ),
            Some(e) => warn!(job = %self.job.name, run, error = %e, "Run failed"),
        }

        (record, error)
    }

    async fn collect(&self, state: &mut FilterState) -> (Result<usize>, PipelineStatsSnapshot) {
        let pipeline = match StreamingPipeline::new(
            &self.job.name,
            &self.pipeline_config,
            Arc::clone(&self.adapter),
            Arc::clone(&self.storage),
            Arc::clone(&self.seen),
            self.retry.clone(),
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => return (Err(e), PipelineStatsSnapshot::default()),
        };
        if let Err(e) = pipeline.start() {
            return (Err(e), PipelineStatsSnapshot::default());
        }

        let traversal = self.traverse(&pipeline, state).await;

        let stats = if self.shutdown.is_set() {
            pipeline.stop().await
        } else {
            tokio::select! {
                stats = pipeline.finish() => stats,
                _ = self.shutdown.wait() => pipeline.stop().await,
            }
        };

        let result = traversal.and_then(|()| {
            self.filter
                .finish_run(state, self.adapter.empty_result_expected())
        });
        (result, stats)
    }

    /// Streams discovery through the filters into the pipeline
    ///
    /// Stops pulling as soon as the filters are saturated, so an over-large
    /// batch is truncated rather than fetched in full.
    async fn traverse(&self, pipeline: &StreamingPipeline, state: &mut FilterState) -> Result<()> {
        let mut items = self.adapter.discover();

        while !self.filter.is_saturated(state) {
            let next = tokio::select! {
                next = items.next() => next,
                _ = self.shutdown.wait() => break,
            };
            let item = match next {
                Some(item) => item?,
                None => break,
            };

            let verdict = self.filter.admit(state, &item)?;
            if verdict != Verdict::Admit {
                trace!(job = %self.job.name, key = %item.key, verdict = ?verdict, "Filtered out");
                continue;
            }

            if !self.enqueue(pipeline, item).await {
                break;
            }
        }

        Ok(())
    }

    /// Offers an item until the pipeline accepts it or shutdown begins
    async fn enqueue(&self, pipeline: &StreamingPipeline, item: Item) -> bool {
        loop {
            if pipeline.add_link(item.clone()) {
                return true;
            }
            if self.shutdown.is_set() || !pipeline.is_running() {
                return false;
            }
            tokio::time::sleep(self.pipeline_config.enqueue_retry()).await;
        }
    }
}
