//! Unbounded exact frequency table.
//!
//! Memory grows with the number of distinct items. Used where exact local
//! counts are affordable and as the reference oracle in simulation tests.

use super::stream_summary::StreamSummary;
use ahash::AHashMap;

#[derive(Debug, Clone, Default)]
pub struct ExactFrequencies {
    counts: AHashMap<String, u64>,
    total: u64,
}

impl ExactFrequencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `inc` occurrences. Returns true if the item was not seen before.
    pub fn offer(&mut self, item: &str, inc: u64) -> bool {
        self.total = self.total.saturating_add(inc);
        match self.counts.get_mut(item) {
            Some(count) => {
                *count = count.saturating_add(inc);
                false
            }
            None => {
                self.counts.insert(item.to_string(), inc);
                true
            }
        }
    }

    pub fn get_freq(&self, item: &str) -> u64 {
        self.counts.get(item).copied().unwrap_or(0)
    }

    pub fn key_exists(&self, item: &str) -> bool {
        self.counts.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all increments.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// All items, highest count first; ties ordered by item.
    pub fn items_freqs(&self) -> Vec<(String, u64)> {
        let mut items: Vec<(String, u64)> = self
            .counts
            .iter()
            .map(|(item, count)| (item.clone(), *count))
            .collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items
    }

    pub fn top_k(&self, k: usize) -> Vec<(String, u64)> {
        let mut items = self.items_freqs();
        items.truncate(k);
        items
    }

    /// Count of the `k`-th highest item, or 0 when fewer than `k` items exist.
    ///
    /// Expected linear time (quickselect).
    pub fn get_k_order_stat(&self, k: usize) -> u64 {
        if k == 0 || k > self.counts.len() {
            return 0;
        }
        let mut counts: Vec<u64> = self.counts.values().copied().collect();
        let (_, kth, _) = counts.select_nth_unstable_by(k - 1, |a, b| b.cmp(a));
        *kth
    }

    /// Summary sized to hold every counted item, so no count carries error.
    pub fn to_summary(&self) -> StreamSummary {
        let mut summary = StreamSummary::new(self.counts.len());
        for (item, count) in self.items_freqs() {
            if count > 0 {
                summary.offer(&item, count);
            }
        }
        summary
    }

    pub fn merge(&mut self, other: &ExactFrequencies) {
        for (item, count) in &other.counts {
            self.offer(item, *count);
        }
    }
}
