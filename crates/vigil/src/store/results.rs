use std::collections::VecDeque;

use dashmap::DashMap;

use crate::result::CheckResult;

/// Results kept per check when no capacity is configured
pub const DEFAULT_CAPACITY_PER_CHECK: usize = 200;

/// Bounded per-check history of results.
///
/// Ordering is by append order. `list_recent` returns the newest `limit`
/// results oldest first, so the last element is the latest result.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    async fn append(&self, result: CheckResult);

    /// Up to `limit` most recent results for `check_id`, oldest first
    async fn list_recent(&self, check_id: &str, limit: usize) -> Vec<CheckResult>;

    async fn latest(&self, check_id: &str) -> Option<CheckResult>;

    /// Ids with at least one stored result, sorted
    async fn check_ids(&self) -> Vec<String>;

    /// Drop the history of one check, returning how many results were removed
    async fn clear(&self, check_id: &str) -> usize;
}

/// Sliding window per check id.
///
/// Windows are sharded so appends for unrelated checks do not contend, and
/// a full window evicts its oldest entry.
#[derive(Debug)]
pub struct InMemoryResultStore {
    windows: DashMap<String, VecDeque<CheckResult>>,
    capacity_per_check: usize,
}

impl InMemoryResultStore {
    pub fn new(capacity_per_check: usize) -> Self {
        Self { windows: DashMap::new(), capacity_per_check: capacity_per_check.max(1) }
    }

    pub fn capacity_per_check(&self) -> usize {
        self.capacity_per_check
    }

    /// Number of results currently held for `check_id`
    pub fn len(&self, check_id: &str) -> usize {
        self.windows.get(check_id).map_or(0, |window| window.len())
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY_PER_CHECK)
    }
}

#[async_trait::async_trait]
impl ResultStore for InMemoryResultStore {
    async fn append(&self, result: CheckResult) {
        let mut window = self
            .windows
            .entry(result.check_id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity_per_check.min(64)));
        if window.len() >= self.capacity_per_check {
            window.pop_front();
        }
        window.push_back(result);
    }

    async fn list_recent(&self, check_id: &str, limit: usize) -> Vec<CheckResult> {
        let Some(window) = self.windows.get(check_id) else {
            return Vec::new();
        };
        let skip = window.len().saturating_sub(limit);
        window.iter().skip(skip).cloned().collect()
    }

    async fn latest(&self, check_id: &str) -> Option<CheckResult> {
        self.windows.get(check_id).and_then(|window| window.back().cloned())
    }

    async fn check_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.windows.iter().map(|entry| entry.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    async fn clear(&self, check_id: &str) -> usize {
        self.windows.remove(check_id).map_or(0, |(_, window)| window.len())
    }
}
