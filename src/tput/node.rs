//! One participant of the three-phase protocol.
//!
//! Every phase has two halves. Each node *contributes* under the blocking
//! window lock, then sleeps the phase wait and tries once to *complete*
//! the phase. The completion marker (`t1`, `S`, `Result`) makes completion
//! happen at most once per window; whoever writes it first wins and later
//! attempts see the marker and back off.
//!
//! Lock or store failures skip the step they guard. A node that misses a
//! phase simply has no share in it; the window still finishes as long as
//! some node completes each phase. Once `Result` exists the window is
//! closed and every later phase step is a no-op.

use super::keys::WindowKeys;
use super::local::LocalCounts;
use super::tokenizer::tokenize;
use crate::config::{ThresholdSource, TputConfig};
use crate::error::TopKError;
use crate::lock::DistributedLock;
use crate::store::KvStore;
use crate::summary::{RecordKeys, StreamSummary};
use ahash::AHashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Merge local summaries, derive `t1`
    Collect,
    /// Merge items above `t1`, derive the candidate set `S`
    Prune,
    /// Exact counts for `S`, publish the answer
    Finalize,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Collect, Phase::Prune, Phase::Finalize];

    pub fn number(self) -> u8 {
        match self {
            Phase::Collect => 1,
            Phase::Prune => 2,
            Phase::Finalize => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase{}", self.number())
    }
}

/// What one node did in one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub contributed: bool,
    pub completed: bool,
}

/// Outcome of [`TputNode::start_sync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub collect: PhaseReport,
    pub prune: PhaseReport,
    pub finalize: PhaseReport,
}

impl SyncReport {
    pub fn phase(&self, phase: Phase) -> PhaseReport {
        match phase {
            Phase::Collect => self.collect,
            Phase::Prune => self.prune,
            Phase::Finalize => self.finalize,
        }
    }

    fn record(&mut self, phase: Phase, report: PhaseReport) {
        match phase {
            Phase::Collect => self.collect = report,
            Phase::Prune => self.prune = report,
            Phase::Finalize => self.finalize = report,
        }
    }

    pub fn completed_any(&self) -> bool {
        Phase::ALL.iter().any(|&p| self.phase(p).completed)
    }
}

/// Word counter for one node plus its side of the protocol.
#[derive(Debug, Clone)]
pub struct TputNode {
    config: TputConfig,
    words: LocalCounts,
}

impl TputNode {
    pub fn new(config: TputConfig) -> Self {
        TputNode {
            words: LocalCounts::new(config.local_mode, config.local_capacity),
            config,
        }
    }

    /// Node holding the counts saved for `window` by [`save_snapshot`],
    /// or empty counts when nothing was saved.
    ///
    /// [`save_snapshot`]: TputNode::save_snapshot
    pub fn restore<S: KvStore>(
        config: TputConfig,
        store: &S,
        window: &str,
    ) -> Result<Self, TopKError> {
        let prefix = WindowKeys::new(window).snapshot(&config.node);
        let words = LocalCounts::load(store, &prefix, config.local_mode, config.local_capacity)?;
        Ok(TputNode { config, words })
    }

    /// Restore the counts saved for `window`, sync them and drop the
    /// snapshot. The snapshot is kept when the sync left no result.
    pub fn sync_saved<S: KvStore, L: DistributedLock>(
        config: TputConfig,
        store: &S,
        lock: &L,
        window: &str,
    ) -> Result<SyncReport, TopKError> {
        let node = TputNode::restore(config, store, window)?;
        let report = node.start_sync(store, lock, window);
        if store.exists(&WindowKeys::new(window).result)? {
            node.discard_snapshot(store, lock, window)?;
        }
        Ok(report)
    }

    pub fn config(&self) -> &TputConfig {
        &self.config
    }

    /// The node-local counts.
    pub fn local(&self) -> &LocalCounts {
        &self.words
    }

    /// Tokenize `text` and count every word once.
    pub fn process_text(&mut self, text: &str) {
        for word in tokenize(text) {
            self.words.offer(&word, 1);
        }
    }

    pub fn process_word(&mut self, word: &str) {
        self.words.offer(word, 1);
    }

    /// Start fresh local counts, e.g. once a window has been synced.
    pub fn reset(&mut self) {
        self.words = LocalCounts::new(self.config.local_mode, self.config.local_capacity);
    }

    /// Save the local counts under `window` so a later process can sync them.
    pub fn save_snapshot<S: KvStore, L: DistributedLock>(
        &self,
        store: &S,
        lock: &L,
        window: &str,
    ) -> Result<(), TopKError> {
        let prefix = WindowKeys::new(window).snapshot(&self.config.node);
        self.words.save(store, lock, &prefix)
    }

    pub fn discard_snapshot<S: KvStore, L: DistributedLock>(
        &self,
        store: &S,
        lock: &L,
        window: &str,
    ) -> Result<(), TopKError> {
        let prefix = WindowKeys::new(window).snapshot(&self.config.node);
        LocalCounts::clear_keys(store, lock, &prefix, self.words.mode())
    }

    /// Published answer for `window`, `None` until phase 3 completed.
    pub fn get_top_k<S: KvStore>(
        &self,
        store: &S,
        window: &str,
    ) -> Result<Option<Vec<(String, u64)>>, TopKError> {
        let keys = WindowKeys::new(window);
        read_tallies(store, &keys.result)
    }

    /// Run all three phases for `window`. Blocks for the sum of the phase
    /// waits plus lock and store time.
    pub fn start_sync<S: KvStore, L: DistributedLock>(
        &self,
        store: &S,
        lock: &L,
        window: &str,
    ) -> SyncReport {
        let keys = WindowKeys::new(window);
        let mut report = SyncReport::default();
        for phase in Phase::ALL {
            report.record(phase, self.run_phase(phase, store, lock, &keys));
        }
        info!(
            window,
            node = %self.config.node,
            completed_any = report.completed_any(),
            "sync finished"
        );
        report
    }

    fn run_phase<S: KvStore, L: DistributedLock>(
        &self,
        phase: Phase,
        store: &S,
        lock: &L,
        keys: &WindowKeys,
    ) -> PhaseReport {
        let window = keys.window.as_str();
        let node = self.config.node.as_str();

        let contributed = match lock.lock_default(window) {
            Some(_guard) => match self.contribute(phase, store, lock, keys) {
                Ok(done) => done,
                Err(e) => {
                    warn!(window, %phase, node, error = %e, "contribution failed");
                    false
                }
            },
            None => {
                warn!(window, %phase, node, "window lock unavailable, skipping contribution");
                false
            }
        };

        let wait = self.wait(phase);
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }

        let completed = match lock.try_lock(window) {
            Some(_guard) => match self.try_complete(phase, store, keys) {
                Ok(done) => done,
                Err(e) => {
                    warn!(window, %phase, node, error = %e, "completion failed");
                    false
                }
            },
            None => {
                debug!(window, %phase, node, "window busy, not completing");
                false
            }
        };

        PhaseReport {
            contributed,
            completed,
        }
    }

    fn wait(&self, phase: Phase) -> Duration {
        let waits = &self.config.phase_waits;
        match phase {
            Phase::Collect => waits.phase1,
            Phase::Prune => waits.phase2,
            Phase::Finalize => waits.phase3,
        }
    }

    fn contribute<S: KvStore, L: DistributedLock>(
        &self,
        phase: Phase,
        store: &S,
        lock: &L,
        keys: &WindowKeys,
    ) -> Result<bool, TopKError> {
        if store.exists(&keys.result)? {
            debug!(window = %keys.window, %phase, "window already finalized");
            return Ok(false);
        }
        match phase {
            Phase::Collect => {
                let mut dict1 =
                    StreamSummary::load(store, &keys.dict1, self.config.shared_capacity)?;
                dict1.merge(self.words.as_summary().into_owned());
                dict1.save(store, lock, &keys.dict1)?;
                store.incr_by(&keys.nodes_count, 1)?;
            }
            Phase::Prune => {
                let t1 = read_u64(store, &keys.t1)?.unwrap_or(0);
                let local = self.words.as_summary();
                let view = local.filtered(t1);
                let mut dict2 =
                    StreamSummary::load(store, &keys.dict2, self.config.shared_capacity)?;
                dict2.merge_filtered(&view);
                dict2.save(store, lock, &keys.dict2)?;
                for item in view.keys() {
                    store.hincr_by(&keys.nodes_per_word, &item, 1)?;
                }
                debug!(window = %keys.window, t1, sent = view.len(), "sent items above t1");
            }
            Phase::Finalize => {
                let Some(mut tallies) = read_tallies(store, &keys.survivors)? else {
                    debug!(window = %keys.window, "no candidate set, skipping");
                    return Ok(false);
                };
                for (item, tally) in tallies.iter_mut() {
                    *tally += self.words.get_freq(item);
                }
                write_tallies(store, &keys.survivors, &tallies)?;
            }
        }
        Ok(true)
    }

    fn try_complete<S: KvStore>(
        &self,
        phase: Phase,
        store: &S,
        keys: &WindowKeys,
    ) -> Result<bool, TopKError> {
        let marker = match phase {
            Phase::Collect => &keys.t1,
            Phase::Prune => &keys.survivors,
            Phase::Finalize => &keys.result,
        };
        if store.exists(&keys.result)? || store.exists(marker)? {
            return Ok(false);
        }

        match phase {
            Phase::Collect => self.complete_collect(store, keys)?,
            Phase::Prune => self.complete_prune(store, keys)?,
            Phase::Finalize => self.complete_finalize(store, keys)?,
        }
        info!(window = %keys.window, %phase, node = %self.config.node, "phase completed");
        Ok(true)
    }

    fn complete_collect<S: KvStore>(&self, store: &S, keys: &WindowKeys) -> Result<(), TopKError> {
        let dict1 = StreamSummary::load(store, &keys.dict1, self.config.shared_capacity)?;
        let nodes = contributor_count(store, keys)?;
        let t1 = dict1.get_k_order_stat(self.config.k) / nodes;
        store.set(&keys.t1, &t1.to_string())?;
        debug!(window = %keys.window, t1, nodes, "published t1");
        Ok(())
    }

    fn complete_prune<S: KvStore>(&self, store: &S, keys: &WindowKeys) -> Result<(), TopKError> {
        let dict2 = StreamSummary::load(store, &keys.dict2, self.config.shared_capacity)?;
        let nodes = contributor_count(store, keys)?;
        let kth = match self.config.threshold_source {
            ThresholdSource::LocalSummary => self.words.get_k_order_stat(self.config.k),
            ThresholdSource::SharedDict2 => dict2.get_k_order_stat(self.config.k),
        };
        let t2 = kth / nodes;
        let share = t2 / nodes;

        let mut reporters: AHashMap<String, u64> = AHashMap::new();
        for (item, raw) in store.hgetall(&keys.nodes_per_word)? {
            let count = raw.parse().map_err(|_| {
                TopKError::codec(&keys.nodes_per_word, format!("bad count {:?}", raw))
            })?;
            reporters.insert(item, count);
        }

        let candidates: Vec<(String, u64)> = dict2
            .items_freqs()
            .into_iter()
            .filter(|(item, partial)| {
                let reported = reporters.get(item).copied().unwrap_or(0);
                let silent = nodes.saturating_sub(reported);
                partial.saturating_add(silent.saturating_mul(share)) >= t2
            })
            .map(|(item, _)| (item, 0))
            .collect();

        write_tallies(store, &keys.survivors, &candidates)?;
        debug!(
            window = %keys.window,
            t2,
            nodes,
            candidates = candidates.len(),
            "published candidate set"
        );
        Ok(())
    }

    fn complete_finalize<S: KvStore>(&self, store: &S, keys: &WindowKeys) -> Result<(), TopKError> {
        let mut tallies = match read_tallies(store, &keys.survivors)? {
            Some(tallies) => tallies,
            None => {
                warn!(window = %keys.window, "finalizing without a candidate set");
                Vec::new()
            }
        };
        // Stable: ties keep candidate order.
        tallies.sort_by(|a, b| b.1.cmp(&a.1));
        tallies.truncate(self.config.k);

        // Teardown first: a published result closes the window for good.
        let dict1 = RecordKeys::new(&keys.dict1);
        let dict2 = RecordKeys::new(&keys.dict2);
        let mut doomed: Vec<&str> = keys.intermediates().to_vec();
        doomed.extend(dict1.all());
        doomed.extend(dict2.all());
        store.del(&doomed)?;

        write_tallies(store, &keys.result, &tallies)?;
        Ok(())
    }
}

/// Phase-1 contributors, never below one.
fn contributor_count<S: KvStore>(store: &S, keys: &WindowKeys) -> Result<u64, TopKError> {
    Ok(read_u64(store, &keys.nodes_count)?.unwrap_or(0).max(1))
}

fn read_u64<S: KvStore>(store: &S, key: &str) -> Result<Option<u64>, TopKError> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| TopKError::codec(key, format!("not a count: {:?}", raw))),
    }
}

fn read_tallies<S: KvStore>(
    store: &S,
    key: &str,
) -> Result<Option<Vec<(String, u64)>>, TopKError> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
    }
}

fn write_tallies<S: KvStore>(
    store: &S,
    key: &str,
    tallies: &[(String, u64)],
) -> Result<(), TopKError> {
    store.set(key, &serde_json::to_string(tallies)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalMode;
    use crate::lock::{FlakyLock, FlakyLockConfig, StoreLock};
    use crate::store::InMemoryStore;

    fn single(k: usize) -> (InMemoryStore, StoreLock<InMemoryStore>, TputNode) {
        let store = InMemoryStore::new();
        let lock = StoreLock::new(store.clone(), crate::config::LockConfig::test());
        let node = TputNode::new(TputConfig::test().with_k(k));
        (store, lock, node)
    }

    #[test]
    fn test_single_node_top1() {
        let (store, lock, mut node) = single(1);
        node.process_text("the cat sat on the mat the cat ate");
        assert_eq!(node.local().get_freq("the"), 3);

        assert_eq!(node.get_top_k(&store, "w1").unwrap(), None);
        let report = node.start_sync(&store, &lock, "w1");
        for phase in Phase::ALL {
            assert!(report.phase(phase).contributed, "{}", phase);
            assert!(report.phase(phase).completed, "{}", phase);
        }
        assert_eq!(
            node.get_top_k(&store, "w1").unwrap(),
            Some(vec![("the".to_string(), 3)])
        );
    }

    #[test]
    fn test_finalize_cleans_up() {
        let (store, lock, mut node) = single(2);
        node.process_text("a b a c a b");
        node.start_sync(&store, &lock, "w");
        assert_eq!(store.keys(), vec!["wResult".to_string()]);
        assert_eq!(
            node.get_top_k(&store, "w").unwrap(),
            Some(vec![("a".to_string(), 3), ("b".to_string(), 2)])
        );
    }

    #[test]
    fn test_marker_blocks_second_completion() {
        let (store, _lock, mut node) = single(1);
        node.process_text("x y x");
        store.set("wt1", "7").unwrap();

        let keys = WindowKeys::new("w");
        assert!(!node.try_complete(Phase::Collect, &store, &keys).unwrap());
        assert_eq!(store.get("wt1").unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn test_finalize_contribution_needs_candidates() {
        let (store, lock, mut node) = single(1);
        node.process_word("x");
        let keys = WindowKeys::new("w");
        assert!(!node.contribute(Phase::Finalize, &store, &lock, &keys).unwrap());

        store.set("wS", r#"[["x",4],["y",0]]"#).unwrap();
        assert!(node.contribute(Phase::Finalize, &store, &lock, &keys).unwrap());
        assert_eq!(
            read_tallies(&store, "wS").unwrap(),
            Some(vec![("x".to_string(), 5), ("y".to_string(), 0)])
        );
    }

    #[test]
    fn test_prune_keeps_items_silent_nodes_could_lift() {
        let (store, lock, mut node) = single(1);
        for _ in 0..8 {
            node.process_word("a");
        }
        let keys = WindowKeys::new("w");

        store.set(&keys.nodes_count, "2").unwrap();
        let mut dict2 = StreamSummary::new(10);
        dict2.offer("a", 8);
        dict2.offer("b", 1);
        dict2.offer("c", 1);
        dict2.save(&store, &lock, &keys.dict2).unwrap();
        store.hincr_by(&keys.nodes_per_word, "a", 1).unwrap();
        store.hincr_by(&keys.nodes_per_word, "b", 1).unwrap();

        // t2 = 8 / 2 = 4, share = 2
        // a: 8 + 1 * 2, b: 1 + 1 * 2 (dropped), c: 1 + 2 * 2
        node.complete_prune(&store, &keys).unwrap();
        let survivors = read_tallies(&store, &keys.survivors).unwrap().unwrap();
        let mut items: Vec<&str> = survivors.iter().map(|(item, _)| item.as_str()).collect();
        items.sort_unstable();
        assert_eq!(items, vec!["a", "c"]);
        assert!(survivors.iter().all(|(_, tally)| *tally == 0));
    }

    #[test]
    fn test_malformed_result_is_an_error() {
        let (store, _lock, node) = single(1);
        store.set("wResult", "not json").unwrap();
        assert!(matches!(
            node.get_top_k(&store, "w"),
            Err(TopKError::Json(_))
        ));
    }

    #[test]
    fn test_late_node_leaves_finalized_window_alone() {
        let (store, lock, mut first) = single(1);
        first.process_text("red red blue");
        first.start_sync(&store, &lock, "w");
        assert_eq!(store.keys(), vec!["wResult".to_string()]);

        let (_, _, mut late) = single(1);
        late.process_text("blue blue blue blue");
        let report = late.start_sync(&store, &lock, "w");
        assert_eq!(report, SyncReport::default());
        assert_eq!(store.keys(), vec!["wResult".to_string()]);
        assert_eq!(
            late.get_top_k(&store, "w").unwrap(),
            Some(vec![("red".to_string(), 2)])
        );
    }

    #[test]
    fn test_teardown_needs_only_the_window_lock() {
        let (store, lock, mut node) = single(1);
        node.process_text("a a b");
        let keys = WindowKeys::new("w");
        node.words.as_summary().save(&store, &lock, &keys.dict1).unwrap();
        node.words.as_summary().save(&store, &lock, &keys.dict2).unwrap();
        store.set(&keys.t1, "1").unwrap();
        store.set(&keys.survivors, r#"[["a",2],["b",1]]"#).unwrap();

        // Blocking acquisitions fail, single attempts succeed.
        let stingy = FlakyLock::new(
            lock,
            FlakyLockConfig {
                seed: 1,
                acquire_fail_prob: 1.0,
                try_fail_prob: 0.0,
            },
        );
        let report = node.run_phase(Phase::Finalize, &store, &stingy, &keys);
        assert!(!report.contributed);
        assert!(report.completed);
        assert_eq!(store.keys(), vec!["wResult".to_string()]);
        assert_eq!(
            node.get_top_k(&store, "w").unwrap(),
            Some(vec![("a".to_string(), 2)])
        );
    }

    #[test]
    fn test_exact_mode_counts_past_local_capacity() {
        let store = InMemoryStore::new();
        let lock = StoreLock::new(store.clone(), crate::config::LockConfig::test());
        let mut config = TputConfig::test()
            .with_k(2)
            .with_local_mode(LocalMode::Exact);
        config.local_capacity = 1;
        let mut node = TputNode::new(config);
        node.process_text("x y z x w v x y");
        assert_eq!(node.local().len(), 5);

        node.start_sync(&store, &lock, "w");
        assert_eq!(
            node.get_top_k(&store, "w").unwrap(),
            Some(vec![("x".to_string(), 3), ("y".to_string(), 2)])
        );
    }

    #[test]
    fn test_snapshot_restore_and_sync() {
        let (store, lock, mut node) = single(1);
        node.process_text("the cat sat on the mat the cat ate");
        node.save_snapshot(&store, &lock, "w").unwrap();

        let restored = TputNode::restore(TputConfig::test().with_k(1), &store, "w").unwrap();
        assert_eq!(restored.local().get_freq("the"), 3);
        assert_eq!(restored.local().len(), node.local().len());

        let report = TputNode::sync_saved(TputConfig::test().with_k(1), &store, &lock, "w").unwrap();
        assert!(report.finalize.completed);
        assert_eq!(store.keys(), vec!["wResult".to_string()]);
        assert_eq!(
            node.get_top_k(&store, "w").unwrap(),
            Some(vec![("the".to_string(), 3)])
        );
    }

    #[test]
    fn test_exact_snapshot_round_trip() {
        let store = InMemoryStore::new();
        let lock = StoreLock::new(store.clone(), crate::config::LockConfig::test());
        let config = TputConfig::test().with_local_mode(LocalMode::Exact);
        let mut node = TputNode::new(config.clone());
        node.process_text("b a b");
        node.save_snapshot(&store, &lock, "w").unwrap();

        let restored = TputNode::restore(config, &store, "w").unwrap();
        assert_eq!(restored.local().mode(), LocalMode::Exact);
        assert_eq!(restored.local().get_freq("b"), 2);

        restored.discard_snapshot(&store, &lock, "w").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_without_snapshot_is_empty() {
        let store = InMemoryStore::new();
        let node = TputNode::restore(TputConfig::test(), &store, "w").unwrap();
        assert!(node.local().is_empty());
    }
}
