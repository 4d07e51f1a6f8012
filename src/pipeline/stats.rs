use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters, updated concurrently by stage workers
///
/// Every counter only grows for the lifetime of the pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    discovered: AtomicU64,
    processed: AtomicU64,
    downloaded: AtomicU64,
    stored: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineStatsSnapshot {
    pub discovered: u64,
    pub processed: u64,
    pub downloaded: u64,
    pub stored: u64,
    /// Items the storage backend declined (already present)
    pub skipped: u64,
    pub errors: u64,
    /// Items finished by a stage after stop, with the next queue already closed
    #[serde(default)]
    pub abandoned: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_discovered(&self) {
        self.discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            discovered: self.discovered.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

impl AddAssign for PipelineStatsSnapshot {
    fn add_assign(&mut self, other: Self) {
        self.discovered += other.discovered;
        self.processed += other.processed;
        self.downloaded += other.downloaded;
        self.stored += other.stored;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.abandoned += other.abandoned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(PipelineStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_downloaded();
                        stats.record_error();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.downloaded, 8000);
        assert_eq!(snapshot.errors, 8000);
        assert_eq!(snapshot.stored, 0);
    }

    #[test]
    fn test_snapshot_accumulates() {
        let mut total = PipelineStatsSnapshot::default();
        total += PipelineStatsSnapshot {
            discovered: 3,
            stored: 2,
            errors: 1,
            ..Default::default()
        };
        total += PipelineStatsSnapshot {
            discovered: 1,
            stored: 1,
            ..Default::default()
        };
        assert_eq!(total.discovered, 4);
        assert_eq!(total.stored, 3);
        assert_eq!(total.errors, 1);
    }
}
