//! Staged streaming pipeline
//!
//! Admitted items flow through three worker pools chained by bounded queues:
//! - processing: adapter-specific preparation
//! - download: fetches bytes through the retry executor
//! - storage: persists bytes and records the key as downloaded
//!
//! Each pool closes its downstream queue when its last worker retires, so
//! closing the discovery queue drains the whole pipeline in order.

mod queue;
mod stats;

pub use queue::{BoundedQueue, PutError, Recv};
pub use stats::{PipelineStats, PipelineStatsSnapshot};

use crate::adapter::{Download, Item, SiteAdapter};
use crate::config::{validate_pipeline_config, PipelineConfig};
use crate::retry::RetryExecutor;
use crate::storage::{SeenStore, StorageBackend};
use crate::{HarvestError, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One phase of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Discovery,
    Processing,
    Download,
    Storage,
}

impl Stage {
    fn slot(self) -> usize {
        match self {
            Stage::Discovery => 0,
            Stage::Processing => 1,
            Stage::Download => 2,
            Stage::Storage => 3,
        }
    }
}

/// A running pipeline for one job run
pub struct StreamingPipeline {
    shared: Arc<Shared>,
    workers: Mutex<Vec<(Stage, JoinHandle<()>)>>,
    started: AtomicBool,
}

struct Shared {
    job: String,
    config: PipelineConfig,
    adapter: Arc<dyn SiteAdapter>,
    storage: Arc<dyn StorageBackend>,
    seen: Arc<dyn SeenStore>,
    retry: RetryExecutor,

    discovered: BoundedQueue<Item>,
    processed: BoundedQueue<Item>,
    downloaded: BoundedQueue<Download>,

    running: AtomicBool,
    stats: PipelineStats,

    /// Live workers per stage, indexed by `Stage::slot`
    live: [AtomicUsize; 4],
    total_live: AtomicUsize,
    retired: Notify,
}

impl StreamingPipeline {
    /// Creates a stopped pipeline
    ///
    /// # Arguments
    ///
    /// * `job` - Job name used in logs
    /// * `config` - Worker counts, queue capacity and timeouts
    /// * `adapter` - Source of the process and download transforms
    /// * `storage` - Where downloaded bytes go
    /// * `seen` - Receives every stored key
    /// * `retry` - Wraps each download
    ///
    /// # Returns
    ///
    /// * `Err(HarvestError::Config)` - A worker count or the queue capacity is zero
    pub fn new(
        job: &str,
        config: &PipelineConfig,
        adapter: Arc<dyn SiteAdapter>,
        storage: Arc<dyn StorageBackend>,
        seen: Arc<dyn SeenStore>,
        retry: RetryExecutor,
    ) -> Result<Self> {
        validate_pipeline_config(config)?;

        let shared = Shared {
            job: job.to_string(),
            config: config.clone(),
            adapter,
            storage,
            seen,
            retry,
            discovered: BoundedQueue::new(config.queue_capacity)?,
            processed: BoundedQueue::new(config.queue_capacity)?,
            downloaded: BoundedQueue::new(config.queue_capacity)?,
            running: AtomicBool::new(false),
            stats: PipelineStats::new(),
            live: Default::default(),
            total_live: AtomicUsize::new(0),
            retired: Notify::new(),
        };

        Ok(Self {
            shared: Arc::new(shared),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Launches every stage's workers as background tasks
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(HarvestError::Stage {
                stage: Stage::Discovery,
                message: "pipeline already started".to_string(),
            });
        }

        let shared = &self.shared;
        let pools = [
            (Stage::Processing, shared.config.process_workers),
            (Stage::Download, shared.config.download_workers),
            (Stage::Storage, shared.config.storage_workers),
        ];

        for (stage, count) in pools {
            shared.live[stage.slot()].store(count, Ordering::Release);
            shared.total_live.fetch_add(count, Ordering::AcqRel);
        }
        shared.running.store(true, Ordering::Release);

        let mut workers = self.workers.lock();
        for (stage, count) in pools {
            for _ in 0..count {
                let guard = RetireGuard {
                    shared: Arc::clone(shared),
                    stage,
                };
                let handle = match stage {
                    Stage::Processing => tokio::spawn(process_worker(guard)),
                    Stage::Download => tokio::spawn(download_worker(guard)),
                    _ => tokio::spawn(storage_worker(guard)),
                };
                workers.push((stage, handle));
            }
        }

        debug!(
            job = %shared.job,
            process = shared.config.process_workers,
            download = shared.config.download_workers,
            storage = shared.config.storage_workers,
            "Pipeline started"
        );
        Ok(())
    }

    /// Offers an item to the discovery queue without waiting
    ///
    /// # Returns
    ///
    /// `false` when the pipeline is not running or the discovery queue is
    /// full or closed. The caller keeps responsibility for the item.
    pub fn add_link(&self, item: Item) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.shared.discovered.try_put(item) {
            Ok(()) => {
                self.shared.stats.record_discovered();
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Lets queued work drain through every stage, then joins the workers
    ///
    /// No more items can be added once this is called. Dropping the returned
    /// future early leaves the pipeline draining; `stop()` can still follow.
    pub async fn finish(&self) -> PipelineStatsSnapshot {
        self.shared.discovered.close();
        self.shared.wait_all_retired().await;

        let handles = std::mem::take(&mut *self.workers.lock());
        for (stage, handle) in handles {
            if let Err(e) = handle.await {
                warn!(job = %self.shared.job, stage = ?stage, error = %e, "Worker task failed");
            }
        }
        self.shared.running.store(false, Ordering::Release);

        let snapshot = self.stats();
        debug!(job = %self.shared.job, stats = ?snapshot, "Pipeline drained");
        snapshot
    }

    /// Stops the pipeline
    ///
    /// Earlier stages abandon queued work immediately; the storage stage
    /// still drains what was already downloaded. Workers get one shared
    /// join deadline and any that miss it are left to finish on their own.
    pub async fn stop(&self) -> PipelineStatsSnapshot {
        self.shared.running.store(false, Ordering::Release);
        self.shared.close_all();

        let handles = std::mem::take(&mut *self.workers.lock());
        let deadline = Instant::now() + self.shared.config.join_timeout();
        let mut stuck = 0usize;

        for (stage, handle) in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(job = %self.shared.job, stage = ?stage, error = %e, "Worker task failed");
                }
                Err(_) => {
                    stuck += 1;
                    warn!(job = %self.shared.job, stage = ?stage, "Worker did not retire in time, abandoning");
                }
            }
        }

        let snapshot = self.stats();
        info!(
            job = %self.shared.job,
            stuck_workers = stuck,
            discovered = snapshot.discovered,
            stored = snapshot.stored,
            errors = snapshot.errors,
            abandoned = snapshot.abandoned,
            "Pipeline stopped"
        );
        snapshot
    }
}

impl Drop for StreamingPipeline {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.close_all();
    }
}

impl Shared {
    fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn close_all(&self) {
        self.discovered.close();
        self.processed.close();
        self.downloaded.close();
    }

    async fn wait_all_retired(&self) {
        loop {
            let mut notified = pin!(self.retired.notified());
            notified.as_mut().enable();
            if self.total_live.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Pushes downstream, waiting for space while the pipeline runs
    async fn forward<T>(&self, queue: &BoundedQueue<T>, item: T) -> bool {
        let poll = self.config.poll_timeout();
        let mut item = item;
        loop {
            match queue.put_wait(item, Some(poll)).await {
                Ok(()) => return true,
                Err(PutError::Closed(_)) => return false,
                Err(PutError::Full(back)) => {
                    if !self.running() {
                        return false;
                    }
                    item = back;
                }
            }
        }
    }

    async fn store(&self, download: &Download) -> Result<bool> {
        let stored = self.storage.store(download).await?;
        // Present on disk either way
        self.seen
            .record_downloaded(&download.item.key, download.bytes.len() as u64)?;
        Ok(stored)
    }

    fn abandon(&self, stage: Stage, key: &str) {
        self.stats.record_abandoned();
        warn!(job = %self.job, stage = ?stage, key = %key, "Item abandoned at stop");
    }

    fn stage_error(&self, stage: Stage, key: &str, error: &HarvestError) {
        self.stats.record_error();
        warn!(job = %self.job, stage = ?stage, key = %key, error = %error, "Item failed, dropping");
    }
}

/// Runs a stage transform, turning a panic into a stage error
async fn guarded<T, F>(stage: Stage, transform: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(transform).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HarvestError::Stage {
            stage,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Accounts for a worker's exit, however it happens
///
/// The last worker of a stage closes that stage's output queue.
struct RetireGuard {
    shared: Arc<Shared>,
    stage: Stage,
}

impl Drop for RetireGuard {
    fn drop(&mut self) {
        let shared = &self.shared;
        let previous = shared.live[self.stage.slot()].fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            match self.stage {
                Stage::Processing => shared.processed.close(),
                Stage::Download => shared.downloaded.close(),
                _ => {}
            }
        }
        shared.total_live.fetch_sub(1, Ordering::AcqRel);
        shared.retired.notify_waiters();
    }
}

async fn process_worker(guard: RetireGuard) {
    let shared = &guard.shared;
    let poll = shared.config.poll_timeout();

    while shared.running() {
        let item = match shared.discovered.get(poll).await {
            Recv::Item(item) => item,
            Recv::Empty => continue,
            Recv::Closed => break,
        };

        let key = item.key.clone();
        match guarded(Stage::Processing, shared.adapter.process(item)).await {
            Ok(item) => {
                shared.stats.record_processed();
                if !shared.forward(&shared.processed, item).await {
                    shared.abandon(Stage::Processing, &key);
                }
            }
            Err(e) => shared.stage_error(Stage::Processing, &key, &e),
        }
    }
}

async fn download_worker(guard: RetireGuard) {
    let shared = &guard.shared;
    let poll = shared.config.poll_timeout();

    while shared.running() {
        let item = match shared.processed.get(poll).await {
            Recv::Item(item) => item,
            Recv::Empty => continue,
            Recv::Closed => break,
        };

        let link = item.link.to_string();
        let fetched = guarded(
            Stage::Download,
            shared.retry.call(&link, None, |timeout| {
                shared.adapter.download(&item, timeout)
            }),
        )
        .await;

        match fetched {
            Ok(download) => {
                shared.stats.record_downloaded();
                if !shared.forward(&shared.downloaded, download).await {
                    shared.abandon(Stage::Download, &item.key);
                }
            }
            Err(e) => shared.stage_error(Stage::Download, &item.key, &e),
        }
    }
}

/// Keeps draining after `running` goes false until its queue is closed and empty
async fn storage_worker(guard: RetireGuard) {
    let shared = &guard.shared;
    let poll = shared.config.poll_timeout();

    loop {
        let download = match shared.downloaded.get(poll).await {
            Recv::Item(download) => download,
            Recv::Empty => continue,
            Recv::Closed => break,
        };

        match guarded(Stage::Storage, shared.store(&download)).await {
            Ok(true) => shared.stats.record_stored(),
            Ok(false) => shared.stats.record_skipped(),
            Err(e) => shared.stage_error(Stage::Storage, &download.item.key, &e),
        }
    }
}
