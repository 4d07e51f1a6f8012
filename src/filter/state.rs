use std::collections::{HashMap, HashSet};

/// Filter bookkeeping for one job, alive for the whole repeat loop
///
/// `unique_seen` and `file_pass_limit` only ever grow. The `post_*`
/// counters describe the current run and are reset by [`begin_run`].
///
/// [`begin_run`]: FilterState::begin_run
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    unique_seen: HashSet<String>,
    file_pass_limit: usize,
    per_category: HashMap<String, usize>,
    post_dedup: usize,
    post_type: usize,
    post_limit: usize,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the per-run counters; cumulative state is kept
    pub fn begin_run(&mut self) {
        self.post_dedup = 0;
        self.post_type = 0;
        self.post_limit = 0;
    }

    /// Keys seen by the uniqueness filter so far
    pub fn unique_seen(&self) -> &HashSet<String> {
        &self.unique_seen
    }

    /// Items admitted across all runs
    pub fn file_pass_limit(&self) -> usize {
        self.file_pass_limit
    }

    /// Items admitted for one category across all runs
    pub fn category_count(&self, category: &str) -> usize {
        self.per_category.get(category).copied().unwrap_or(0)
    }

    /// Items that survived deduplication this run
    pub fn post_dedup(&self) -> usize {
        self.post_dedup
    }

    /// Items that survived the size and category filters this run
    pub fn post_type(&self) -> usize {
        self.post_type
    }

    /// Items admitted this run
    pub fn post_limit(&self) -> usize {
        self.post_limit
    }

    /// Returns true when `key` had not been seen before
    pub(super) fn mark_seen(&mut self, key: &str) -> bool {
        if self.unique_seen.contains(key) {
            return false;
        }
        self.unique_seen.insert(key.to_string());
        self.post_dedup += 1;
        true
    }

    pub(super) fn mark_typed(&mut self) {
        self.post_type += 1;
    }

    pub(super) fn take_category_slot(&mut self, category: &str, limit: usize) -> bool {
        let count = self.per_category.entry(category.to_string()).or_insert(0);
        if *count >= limit {
            return false;
        }
        *count += 1;
        true
    }

    pub(super) fn mark_admitted(&mut self) {
        self.file_pass_limit += 1;
        self.post_limit += 1;
    }
}
