//! Node-local word counts.

use crate::config::LocalMode;
use crate::error::TopKError;
use crate::lock::DistributedLock;
use crate::store::KvStore;
use crate::summary::{ExactFrequencies, StreamSummary};
use std::borrow::Cow;

/// Word counts of one node, bounded or exact depending on [`LocalMode`].
#[derive(Debug, Clone)]
pub enum LocalCounts {
    SpaceSaving(StreamSummary),
    Exact(ExactFrequencies),
}

impl LocalCounts {
    pub fn new(mode: LocalMode, capacity: usize) -> Self {
        match mode {
            LocalMode::SpaceSaving => LocalCounts::SpaceSaving(StreamSummary::new(capacity)),
            LocalMode::Exact => LocalCounts::Exact(ExactFrequencies::new()),
        }
    }

    pub fn mode(&self) -> LocalMode {
        match self {
            LocalCounts::SpaceSaving(_) => LocalMode::SpaceSaving,
            LocalCounts::Exact(_) => LocalMode::Exact,
        }
    }

    pub fn offer(&mut self, item: &str, inc: u64) -> bool {
        match self {
            LocalCounts::SpaceSaving(summary) => summary.offer(item, inc),
            LocalCounts::Exact(table) => table.offer(item, inc),
        }
    }

    pub fn get_freq(&self, item: &str) -> u64 {
        match self {
            LocalCounts::SpaceSaving(summary) => summary.get_freq(item),
            LocalCounts::Exact(table) => table.get_freq(item),
        }
    }

    pub fn get_k_order_stat(&self, k: usize) -> u64 {
        match self {
            LocalCounts::SpaceSaving(summary) => summary.get_k_order_stat(k),
            LocalCounts::Exact(table) => table.get_k_order_stat(k),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LocalCounts::SpaceSaving(summary) => summary.len(),
            LocalCounts::Exact(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bound on tracked items; `None` for exact tables.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            LocalCounts::SpaceSaving(summary) => Some(summary.capacity()),
            LocalCounts::Exact(_) => None,
        }
    }

    /// The counts in the form the shared records merge.
    pub fn as_summary(&self) -> Cow<'_, StreamSummary> {
        match self {
            LocalCounts::SpaceSaving(summary) => Cow::Borrowed(summary),
            LocalCounts::Exact(table) => Cow::Owned(table.to_summary()),
        }
    }

    pub fn save<S: KvStore, L: DistributedLock>(
        &self,
        store: &S,
        lock: &L,
        prefix: &str,
    ) -> Result<(), TopKError> {
        match self {
            LocalCounts::SpaceSaving(summary) => summary.save(store, lock, prefix),
            LocalCounts::Exact(table) => table.save(store, lock, prefix),
        }
    }

    /// Counts saved under `prefix`, or empty ones when nothing is stored.
    pub fn load<S: KvStore>(
        store: &S,
        prefix: &str,
        mode: LocalMode,
        capacity: usize,
    ) -> Result<Self, TopKError> {
        Ok(match mode {
            LocalMode::SpaceSaving => {
                LocalCounts::SpaceSaving(StreamSummary::load(store, prefix, capacity)?)
            }
            LocalMode::Exact => LocalCounts::Exact(ExactFrequencies::load(store, prefix)?),
        })
    }

    pub fn clear_keys<S: KvStore, L: DistributedLock>(
        store: &S,
        lock: &L,
        prefix: &str,
        mode: LocalMode,
    ) -> Result<(), TopKError> {
        match mode {
            LocalMode::SpaceSaving => StreamSummary::clear_keys(store, lock, prefix),
            LocalMode::Exact => ExactFrequencies::clear_keys(store, lock, prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_mode_never_evicts() {
        let mut bounded = LocalCounts::new(LocalMode::SpaceSaving, 2);
        let mut exact = LocalCounts::new(LocalMode::Exact, 2);
        for word in ["a", "b", "c", "a"] {
            bounded.offer(word, 1);
            exact.offer(word, 1);
        }
        assert_eq!(bounded.len(), 2);
        assert_eq!(exact.len(), 3);
        assert_eq!(exact.get_freq("b"), 1);
        assert_eq!(exact.capacity(), None);
        assert_eq!(exact.mode(), LocalMode::Exact);
        assert_eq!(exact.get_k_order_stat(1), 2);
        let summary = exact.as_summary();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary.get_freq("a"), 2);
        assert_eq!(summary.get_freq("c"), 1);
    }

    #[test]
    fn test_borrowed_summary_for_space_saving() {
        let mut counts = LocalCounts::new(LocalMode::SpaceSaving, 4);
        counts.offer("x", 2);
        assert!(matches!(counts.as_summary(), Cow::Borrowed(_)));
        assert_eq!(counts.capacity(), Some(4));
    }
}
