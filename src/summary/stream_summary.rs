//! Space-Saving stream summary.
//!
//! Tracks at most `capacity` items. Counters are grouped into buckets of
//! equal count, and buckets are chained from the highest count (head) to the
//! lowest (tail), so the eviction candidate is always the last member of the
//! tail bucket.
//!
//! Guarantees for every tracked item: `count - error <= true_freq <= count`.
//! Any item whose true frequency exceeds the minimum tracked count is
//! guaranteed to be tracked.

use super::arena::{BucketId, CounterId, SlotArena};
use super::bucket::Bucket;
use super::counter::Counter;
use super::linked_list::Chain;
use ahash::{AHashMap, AHashSet};

#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub(crate) capacity: usize,
    pub(crate) next_bucket_id: u64,
    pub(crate) index: AHashMap<String, CounterId>,
    pub(crate) counters: SlotArena<CounterId, Counter>,
    pub(crate) buckets: SlotArena<BucketId, Bucket>,
    /// Head is the maximum count, tail the minimum.
    pub(crate) chain: Chain<BucketId>,
}

impl StreamSummary {
    /// Verify all invariants hold for this summary
    #[cfg(debug_assertions)]
    fn verify_invariants(&self) {
        let result = self.check_structure();
        debug_assert!(result.is_ok(), "Invariant violated: {:?}", result);
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    fn verify_invariants(&self) {}

    pub fn new(capacity: usize) -> Self {
        StreamSummary {
            capacity,
            next_bucket_id: 0,
            index: AHashMap::with_capacity(capacity.min(1024)),
            counters: SlotArena::with_capacity(capacity.min(1024)),
            buckets: SlotArena::new(),
            chain: Chain::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tracked items.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.chain.len()
    }

    /// Add `inc` occurrences of `item`. Returns true if the item was not tracked before.
    pub fn offer(&mut self, item: &str, inc: u64) -> bool {
        if self.capacity == 0 {
            return true;
        }

        if let Some(&id) = self.index.get(item) {
            self.increment(id, inc);
            self.verify_invariants();
            return false;
        }

        let id = if self.index.len() < self.capacity {
            let bucket = self.zero_bucket();
            self.buckets[bucket]
                .members
                .push_back(&mut self.counters, Counter::new(item.to_string(), bucket))
        } else {
            self.take_over_min(item)
        };
        self.index.insert(item.to_string(), id);
        self.increment(id, inc);

        // TigerStyle: Postcondition - new item is tracked and capacity holds
        debug_assert!(
            self.index.contains_key(item),
            "Postcondition violated: offered item must be tracked"
        );
        debug_assert!(
            self.index.len() <= self.capacity,
            "Postcondition violated: size exceeds capacity"
        );
        self.verify_invariants();
        true
    }

    /// Reuse the last counter of the minimum bucket for `item`.
    fn take_over_min(&mut self, item: &str) -> CounterId {
        let min_bucket = self
            .chain
            .last()
            .expect("full summary with nonzero capacity has a tail bucket");
        let min_count = self.buckets[min_bucket].count;
        let victim = self.buckets[min_bucket]
            .members
            .last()
            .expect("buckets in the chain are never empty");

        let counter = &mut self.counters[victim];
        let dropped = std::mem::replace(&mut counter.item, item.to_string());
        counter.error = min_count;
        self.index.remove(&dropped);
        victim
    }

    /// Tail bucket if it holds count 0, otherwise a fresh one appended at the tail.
    fn zero_bucket(&mut self) -> BucketId {
        match self.chain.last() {
            Some(tail) if self.buckets[tail].count == 0 => tail,
            _ => {
                let id = self.alloc_bucket_id();
                self.chain.push_back(&mut self.buckets, Bucket::new(id, 0))
            }
        }
    }

    fn alloc_bucket_id(&mut self) -> u64 {
        let id = self.next_bucket_id;
        self.next_bucket_id += 1;
        id
    }

    /// Move a counter up by `inc`, joining or creating the bucket for its new count.
    fn increment(&mut self, id: CounterId, inc: u64) {
        if inc == 0 {
            return;
        }
        let old_bucket = self.counters[id].bucket;
        let new_count = self.counters[id].count.saturating_add(inc);

        self.buckets[old_bucket].members.unlink(&mut self.counters, id);
        self.counters[id].count = new_count;

        // Walk toward higher counts. `below` ends as the bucket right after the target slot.
        let mut below = old_bucket;
        let mut cursor = self.chain.prev(&self.buckets, old_bucket);
        let existing = loop {
            match cursor {
                Some(bucket) if self.buckets[bucket].count == new_count => break Some(bucket),
                Some(bucket) if self.buckets[bucket].count < new_count => {
                    below = bucket;
                    cursor = self.chain.prev(&self.buckets, bucket);
                }
                _ => break None,
            }
        };

        let target = match existing {
            Some(bucket) => bucket,
            None => {
                let bucket_id = self.alloc_bucket_id();
                self.chain.insert_before(
                    &mut self.buckets,
                    Bucket::new(bucket_id, new_count),
                    Some(below),
                )
            }
        };
        self.buckets[target].members.link_back(&mut self.counters, id);
        self.counters[id].bucket = target;

        if self.buckets[old_bucket].is_empty() {
            self.chain.remove(&mut self.buckets, old_bucket);
        }
    }

    fn remove_counter(&mut self, id: CounterId) {
        let bucket = self.counters[id].bucket;
        if let Some(counter) = self.buckets[bucket].members.remove(&mut self.counters, id) {
            self.index.remove(&counter.item);
        }
        if self.buckets[bucket].is_empty() {
            self.chain.remove(&mut self.buckets, bucket);
        }
    }

    /// Estimated count (upper bound), 0 if untracked.
    pub fn get_freq(&self, item: &str) -> u64 {
        self.index
            .get(item)
            .map(|&id| self.counters[id].count)
            .unwrap_or(0)
    }

    /// Overestimation of a tracked item, 0 if untracked.
    pub fn error_of(&self, item: &str) -> u64 {
        self.index
            .get(item)
            .map(|&id| self.counters[id].error)
            .unwrap_or(0)
    }

    pub fn key_exists(&self, item: &str) -> bool {
        self.index.contains_key(item)
    }

    /// Counters from the highest bucket down; within a bucket, newest member first.
    pub(crate) fn counters_desc(&self) -> impl Iterator<Item = &Counter> + '_ {
        self.chain
            .iter_forward(&self.buckets)
            .flat_map(move |(_, bucket)| {
                bucket
                    .members
                    .iter_backward(&self.counters)
                    .map(|(_, counter)| counter)
            })
    }

    /// Every tracked item with its upper-bound count, highest first.
    pub fn items_freqs(&self) -> Vec<(String, u64)> {
        self.counters_desc()
            .map(|c| (c.item.clone(), c.count))
            .collect()
    }

    /// Up to `k` items with their guaranteed lower bounds, walking buckets from the maximum.
    pub fn top_k(&self, k: usize) -> Vec<(String, u64)> {
        self.counters_desc()
            .take(k)
            .map(|c| (c.item.clone(), c.lower_bound()))
            .collect()
    }

    /// Count of the `k`-th highest tracked item, or 0 when fewer than `k` are tracked.
    pub fn get_k_order_stat(&self, k: usize) -> u64 {
        let mut remaining = k;
        for (_, bucket) in self.chain.iter_forward(&self.buckets) {
            if remaining == 0 {
                break;
            }
            if remaining <= bucket.len() {
                return bucket.count;
            }
            remaining -= bucket.len();
        }
        0
    }

    /// Read-only view of the buckets with `count >= threshold`.
    pub fn filtered(&self, threshold: u64) -> FilteredSummary<'_> {
        FilteredSummary {
            source: self,
            threshold,
        }
    }

    /// Fold `other` into this summary, consuming it.
    pub fn merge(&mut self, other: StreamSummary) {
        self.merge_from(&other, 0);
    }

    /// Fold a filtered view into this summary. The view's source is left untouched.
    pub fn merge_filtered(&mut self, view: &FilteredSummary<'_>) {
        self.merge_from(view.source, view.threshold);
    }

    fn merge_from(&mut self, other: &StreamSummary, min_count: u64) {
        #[cfg(debug_assertions)]
        let before: Vec<(String, u64)> = self.items_freqs();

        // Items tracked on both sides gain the other side's lower bound.
        let mut shared: AHashSet<&str> = AHashSet::new();
        for counter in other.counters_desc() {
            if counter.count < min_count {
                break;
            }
            if let Some(&id) = self.index.get(counter.item.as_str()) {
                self.increment(id, counter.lower_bound());
                shared.insert(counter.item.as_str());
            }
        }

        // Sorted walk over both descending chains, cloning other-only counters
        // into place until `size` reaches capacity.
        let mut mine = self.chain.first(&self.buckets);
        let mut theirs = other.next_mergeable(other.chain.first(&other.buckets), min_count, &shared);
        let mut size = 0usize;

        while size < self.capacity {
            let (Some(m), Some(t)) = (mine, theirs) else {
                break;
            };
            let my_count = self.buckets[m].count;
            let their_count = other.buckets[t].count;

            if my_count == their_count {
                size += self.buckets[m].len();
                size = self.absorb_members(other, t, m, size, &shared);
                mine = self.chain.next(&self.buckets, m);
                theirs = other.next_mergeable(other.chain.next(&other.buckets, t), min_count, &shared);
            } else if my_count > their_count {
                size += self.buckets[m].len();
                mine = self.chain.next(&self.buckets, m);
            } else {
                let bucket_id = self.alloc_bucket_id();
                let bucket =
                    self.chain
                        .insert_before(&mut self.buckets, Bucket::new(bucket_id, their_count), Some(m));
                size = self.absorb_members(other, t, bucket, size, &shared);
                theirs = other.next_mergeable(other.chain.next(&other.buckets, t), min_count, &shared);
            }
        }

        while let Some(t) = theirs {
            if size >= self.capacity {
                break;
            }
            let bucket_id = self.alloc_bucket_id();
            let bucket = self.chain.insert_before(
                &mut self.buckets,
                Bucket::new(bucket_id, other.buckets[t].count),
                mine,
            );
            size = self.absorb_members(other, t, bucket, size, &shared);
            theirs = other.next_mergeable(other.chain.next(&other.buckets, t), min_count, &shared);
        }

        // Trim lowest counts first.
        while self.index.len() > self.capacity {
            let Some(tail) = self.chain.last() else {
                break;
            };
            match self.buckets[tail].members.last() {
                Some(victim) => self.remove_counter(victim),
                None => break,
            }
        }

        // TigerStyle: Postcondition - capacity holds and surviving counts never drop
        debug_assert!(
            self.index.len() <= self.capacity,
            "Postcondition violated: merge left {} items over capacity {}",
            self.index.len(),
            self.capacity
        );
        #[cfg(debug_assertions)]
        for (item, count) in &before {
            if self.key_exists(item) {
                debug_assert!(
                    self.get_freq(item) >= *count,
                    "Postcondition violated: count of '{}' decreased during merge",
                    item
                );
            }
        }
        self.verify_invariants();
    }

    /// First bucket at or after `cursor` that still has a member outside `skip`.
    fn next_mergeable(
        &self,
        mut cursor: Option<BucketId>,
        min_count: u64,
        skip: &AHashSet<&str>,
    ) -> Option<BucketId> {
        while let Some(id) = cursor {
            let bucket = &self.buckets[id];
            if bucket.count < min_count {
                return None;
            }
            let has_new = bucket
                .members
                .iter_backward(&self.counters)
                .any(|(_, c)| !skip.contains(c.item.as_str()));
            if has_new {
                return Some(id);
            }
            cursor = bucket.links.next;
        }
        None
    }

    /// Clone the members of `other`'s bucket `from` into bucket `into`, newest first.
    fn absorb_members(
        &mut self,
        other: &StreamSummary,
        from: BucketId,
        into: BucketId,
        mut size: usize,
        skip: &AHashSet<&str>,
    ) -> usize {
        for (_, counter) in other.buckets[from].members.iter_backward(&other.counters) {
            if size >= self.capacity {
                break;
            }
            if skip.contains(counter.item.as_str()) {
                continue;
            }
            let mut clone = Counter::new(counter.item.clone(), into);
            clone.count = counter.count;
            clone.error = counter.error;
            let id = self.buckets[into].members.push_back(&mut self.counters, clone);
            self.index.insert(counter.item.clone(), id);
            size += 1;
        }
        size
    }

    /// Full structural check: chain order, back-references, index consistency, capacity.
    pub fn check_structure(&self) -> Result<(), String> {
        self.chain.check(&self.buckets)?;
        if self.chain.len() != self.buckets.len() {
            return Err(format!(
                "{} buckets allocated but {} chained",
                self.buckets.len(),
                self.chain.len()
            ));
        }

        let mut members_seen = 0usize;
        let mut previous_count: Option<u64> = None;
        for (bucket_id, bucket) in self.chain.iter_forward(&self.buckets) {
            if bucket.is_empty() {
                return Err(format!("bucket {} with count {} is empty", bucket.id, bucket.count));
            }
            if let Some(prev) = previous_count {
                if bucket.count >= prev {
                    return Err(format!(
                        "bucket counts not strictly descending: {} after {}",
                        bucket.count, prev
                    ));
                }
            }
            previous_count = Some(bucket.count);

            bucket.members.check(&self.counters)?;
            for (counter_id, counter) in bucket.members.iter_forward(&self.counters) {
                if counter.bucket != bucket_id {
                    return Err(format!("counter '{}' points at the wrong bucket", counter.item));
                }
                if counter.count != bucket.count {
                    return Err(format!(
                        "counter '{}' has count {} in bucket of count {}",
                        counter.item, counter.count, bucket.count
                    ));
                }
                if counter.error > counter.count {
                    return Err(format!(
                        "counter '{}' has error {} above count {}",
                        counter.item, counter.error, counter.count
                    ));
                }
                if self.index.get(counter.item.as_str()) != Some(&counter_id) {
                    return Err(format!("counter '{}' missing from item index", counter.item));
                }
                members_seen += 1;
            }
        }

        if members_seen != self.index.len() || members_seen != self.counters.len() {
            return Err(format!(
                "{} chained counters, {} indexed items, {} allocated counters",
                members_seen,
                self.index.len(),
                self.counters.len()
            ));
        }
        if self.index.len() > self.capacity {
            return Err(format!(
                "{} items tracked over capacity {}",
                self.index.len(),
                self.capacity
            ));
        }
        Ok(())
    }
}

/// Read-only view over the buckets of a summary whose count reaches a threshold.
#[derive(Debug, Clone, Copy)]
pub struct FilteredSummary<'a> {
    source: &'a StreamSummary,
    threshold: u64,
}

impl<'a> FilteredSummary<'a> {
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn source(&self) -> &'a StreamSummary {
        self.source
    }

    fn counters(&self) -> impl Iterator<Item = &'a Counter> + 'a {
        let threshold = self.threshold;
        self.source
            .counters_desc()
            .take_while(move |c| c.count >= threshold)
    }

    /// Items passing the threshold, highest count first.
    pub fn keys(&self) -> Vec<String> {
        self.counters().map(|c| c.item.clone()).collect()
    }

    pub fn items_freqs(&self) -> Vec<(String, u64)> {
        self.counters().map(|c| (c.item.clone(), c.count)).collect()
    }

    pub fn get_freq(&self, item: &str) -> u64 {
        match self.source.get_freq(item) {
            count if count >= self.threshold => count,
            _ => 0,
        }
    }

    pub fn key_exists(&self, item: &str) -> bool {
        self.source.key_exists(item) && self.source.get_freq(item) >= self.threshold
    }

    pub fn len(&self) -> usize {
        self.counters().count()
    }

    pub fn is_empty(&self) -> bool {
        self.counters().next().is_none()
    }
}
