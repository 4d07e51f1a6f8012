//! Stateful filter chain between discovery and the pipeline
//!
//! Items pass through these filters in order:
//! - already downloaded (read-only seen-store check)
//! - uniqueness within the job's lifetime
//! - size, when the job caps file size
//! - category, with the limit applied to each category on its own
//! - global limit, when no categories are requested
//!
//! A limit given together with categories multiplies: a limit of 10 over two
//! categories admits up to 20 items.

mod state;

pub use state::FilterState;

use crate::adapter::Item;
use crate::config::JobConfig;
use crate::storage::SeenStore;
use crate::{ConfigError, ConfigResult, HarvestError, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// What the filter chain decided for one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    AlreadyDownloaded,
    Duplicate,
    TooLarge,
    WrongCategory,
    CategoryFull,
    LimitReached,
}

/// Filter configuration for one job
pub struct FilterPipeline {
    job: String,
    categories: HashSet<String>,
    limit: Option<usize>,
    max_size: Option<u64>,
    seen: Arc<dyn SeenStore>,
}

impl FilterPipeline {
    /// Creates a filter chain
    ///
    /// # Arguments
    ///
    /// * `job` - Job name, used in errors and logs
    /// * `categories` - Category tags to keep; empty keeps every category
    /// * `limit` - Cap on admitted items, per category when categories are given
    /// * `max_size` - Items with a known size above this are dropped
    /// * `seen` - Store of keys already downloaded
    ///
    /// # Returns
    ///
    /// * `Err(ConfigError::Validation)` - `limit` is zero
    pub fn new(
        job: &str,
        categories: impl IntoIterator<Item = String>,
        limit: Option<usize>,
        max_size: Option<u64>,
        seen: Arc<dyn SeenStore>,
    ) -> ConfigResult<Self> {
        if limit == Some(0) {
            return Err(ConfigError::Validation(format!(
                "job '{}': limit must be positive",
                job
            )));
        }

        Ok(Self {
            job: job.to_string(),
            categories: categories.into_iter().collect(),
            limit,
            max_size,
            seen,
        })
    }

    /// Builds the filter chain described by a job's configuration
    pub fn from_job(job: &JobConfig, seen: Arc<dyn SeenStore>) -> ConfigResult<Self> {
        Self::new(
            &job.name,
            job.categories.iter().cloned(),
            job.limit,
            job.max_file_size,
            seen,
        )
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Runs one item through the chain, updating `state`
    pub fn admit(&self, state: &mut FilterState, item: &Item) -> Result<Verdict> {
        if self.seen.already_downloaded(&item.key)? {
            return Ok(Verdict::AlreadyDownloaded);
        }

        if !state.mark_seen(&item.key) {
            return Ok(Verdict::Duplicate);
        }

        if let (Some(max), Some(size)) = (self.max_size, item.size) {
            if size > max {
                debug!(job = %self.job, key = %item.key, size, max, "Item exceeds size cap");
                return Ok(Verdict::TooLarge);
            }
        }

        if self.categories.is_empty() {
            state.mark_typed();
            if let Some(limit) = self.limit {
                if state.file_pass_limit() >= limit {
                    return Ok(Verdict::LimitReached);
                }
            }
        } else {
            if !self.categories.contains(&item.category) {
                return Ok(Verdict::WrongCategory);
            }
            state.mark_typed();
            if let Some(limit) = self.limit {
                if !state.take_category_slot(&item.category, limit) {
                    return Ok(Verdict::CategoryFull);
                }
            }
        }

        state.mark_admitted();
        Ok(Verdict::Admit)
    }

    /// Whether no further item can be admitted
    ///
    /// Lets the traversal stop pulling from a lazy source once every limit
    /// is used up.
    pub fn is_saturated(&self, state: &FilterState) -> bool {
        match self.limit {
            None => false,
            Some(limit) if self.categories.is_empty() => state.file_pass_limit() >= limit,
            Some(limit) => self
                .categories
                .iter()
                .all(|category| state.category_count(category) >= limit),
        }
    }

    /// Closes a run, failing when it produced nothing unexpectedly
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - Items admitted this run
    /// * `Err(HarvestError::NoFilesFound)` - Nothing admitted and the source does
    ///   not declare empty results as normal
    pub fn finish_run(&self, state: &FilterState, empty_expected: bool) -> Result<usize> {
        info!(
            job = %self.job,
            post_dedup = state.post_dedup(),
            post_type = state.post_type(),
            admitted = state.post_limit(),
            total = state.file_pass_limit(),
            "Filtered discovery"
        );

        if state.post_limit() == 0 && !empty_expected {
            return Err(HarvestError::NoFilesFound {
                job: self.job.clone(),
            });
        }
        Ok(state.post_limit())
    }

    /// Filters a whole in-memory sequence as one run
    pub fn apply<I>(&self, state: &mut FilterState, items: I, empty_expected: bool) -> Result<Vec<Item>>
    where
        I: IntoIterator<Item = Item>,
    {
        state.begin_run();
        let mut admitted = Vec::new();
        for item in items {
            if self.is_saturated(state) {
                break;
            }
            if self.admit(state, &item)? == Verdict::Admit {
                admitted.push(item);
            }
        }
        self.finish_run(state, empty_expected)?;
        Ok(admitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySeenStore;
    use url::Url;

    fn item(key: &str, category: &str) -> Item {
        Item::new(
            key,
            category,
            Url::parse(&format!("https://example.com/{}", key)).unwrap(),
        )
    }

    fn pipeline(categories: &[&str], limit: Option<usize>) -> FilterPipeline {
        FilterPipeline::new(
            "test",
            categories.iter().map(|c| c.to_string()),
            limit,
            None,
            Arc::new(MemorySeenStore::new()),
        )
        .unwrap()
    }

    fn keys(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.key.as_str()).collect()
    }

    #[test]
    fn test_zero_limit_fails_fast() {
        let result = FilterPipeline::new("test", Vec::new(), Some(0), None, Arc::new(MemorySeenStore::new()));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_duplicates_emitted_once() {
        let filter = pipeline(&[], None);
        let mut state = FilterState::new();
        let items = vec![
            item("a", "nc"),
            item("b", "nc"),
            item("a", "nc"),
            item("c", "nc"),
            item("b", "nc"),
        ];

        let out = filter.apply(&mut state, items, false).unwrap();
        assert_eq!(keys(&out), vec!["a", "b", "c"]);
        assert_eq!(state.unique_seen().len(), 3);
        assert_eq!(state.post_dedup(), 3);
    }

    #[test]
    fn test_duplicate_never_reconsidered_across_runs() {
        let filter = pipeline(&[], None);
        let mut state = FilterState::new();

        filter.apply(&mut state, vec![item("a", "nc")], false).unwrap();
        let second = filter.apply(&mut state, vec![item("a", "nc")], true).unwrap();
        assert!(second.is_empty());
        assert_eq!(state.unique_seen().len(), 1);
    }

    #[test]
    fn test_already_downloaded_dropped() {
        let filter = FilterPipeline::new(
            "test",
            Vec::new(),
            None,
            None,
            Arc::new(MemorySeenStore::with_keys(["old"])),
        )
        .unwrap();
        let mut state = FilterState::new();

        let out = filter
            .apply(&mut state, vec![item("old", "nc"), item("new", "nc")], false)
            .unwrap();
        assert_eq!(keys(&out), vec!["new"]);
        assert!(!state.unique_seen().contains("old"));
    }

    #[test]
    fn test_limit_applies_per_category() {
        let filter = pipeline(&["grib2", "nc"], Some(2));
        let mut state = FilterState::new();
        let items = vec![
            item("g1", "grib2"),
            item("n1", "nc"),
            item("g2", "grib2"),
            item("t1", "txt"),
            item("g3", "grib2"),
            item("n2", "nc"),
            item("n3", "nc"),
        ];

        let out = filter.apply(&mut state, items, false).unwrap();
        assert_eq!(keys(&out), vec!["g1", "n1", "g2", "n2"]);
        assert_eq!(state.file_pass_limit(), 4);
        assert_eq!(state.category_count("grib2"), 2);
        assert_eq!(state.category_count("nc"), 2);
    }

    #[test]
    fn test_categories_without_limit_keep_all_matches() {
        let filter = pipeline(&["nc"], None);
        let mut state = FilterState::new();
        let items = vec![item("a", "nc"), item("b", "csv"), item("c", "nc")];

        let out = filter.apply(&mut state, items, false).unwrap();
        assert_eq!(keys(&out), vec!["a", "c"]);
        assert_eq!(state.post_type(), 2);
    }

    #[test]
    fn test_global_limit_truncates_batch() {
        let filter = pipeline(&[], Some(1));
        let mut state = FilterState::new();
        let items = vec![item("A1", "a"), item("A2", "a"), item("B1", "b")];

        let out = filter.apply(&mut state, items, false).unwrap();
        assert_eq!(keys(&out), vec!["A1"]);
        assert!(filter.is_saturated(&state));
    }

    #[test]
    fn test_global_limit_is_cumulative_across_runs() {
        let filter = pipeline(&[], Some(5));
        let mut state = FilterState::new();

        let first: Vec<_> = (0..3).map(|i| item(&format!("r1-{}", i), "nc")).collect();
        let second: Vec<_> = (0..10).map(|i| item(&format!("r2-{}", i), "nc")).collect();

        assert_eq!(filter.apply(&mut state, first, false).unwrap().len(), 3);
        assert_eq!(filter.apply(&mut state, second, false).unwrap().len(), 2);
        assert_eq!(state.file_pass_limit(), 5);
    }

    #[test]
    fn test_size_cap_drops_known_oversized_items() {
        let filter = FilterPipeline::new(
            "test",
            Vec::new(),
            None,
            Some(100),
            Arc::new(MemorySeenStore::new()),
        )
        .unwrap();
        let mut state = FilterState::new();
        let items = vec![
            item("small", "nc").with_size(Some(10)),
            item("big", "nc").with_size(Some(1000)),
            item("unknown", "nc"),
        ];

        let out = filter.apply(&mut state, items, false).unwrap();
        assert_eq!(keys(&out), vec!["small", "unknown"]);
    }

    #[test]
    fn test_empty_result_fails_unless_expected() {
        let filter = pipeline(&["nc"], None);
        let mut state = FilterState::new();

        let err = filter
            .apply(&mut state, vec![item("a", "csv")], false)
            .unwrap_err();
        assert!(matches!(err, HarvestError::NoFilesFound { .. }));

        let out = filter.apply(&mut state, Vec::new(), true).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_verdicts() {
        let filter = pipeline(&["nc"], Some(1));
        let mut state = FilterState::new();

        assert_eq!(filter.admit(&mut state, &item("a", "nc")).unwrap(), Verdict::Admit);
        assert_eq!(filter.admit(&mut state, &item("a", "nc")).unwrap(), Verdict::Duplicate);
        assert_eq!(filter.admit(&mut state, &item("b", "csv")).unwrap(), Verdict::WrongCategory);
        assert_eq!(filter.admit(&mut state, &item("c", "nc")).unwrap(), Verdict::CategoryFull);
    }
}
