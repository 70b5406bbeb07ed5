//! Deterministic Simulation Testing for Stream Summaries
//!
//! VOPR-style testing harness for StreamSummary that enables:
//! - Deterministic random operation generation over a skewed item space
//! - Cross-checking against an exact frequency oracle
//! - Invariant checking after each operation
//! - Seed-based reproducibility for debugging

use super::exact::ExactFrequencies;
use super::stream_summary::StreamSummary;
use crate::config::LockConfig;
use crate::lock::StoreLock;
use crate::simulator::DeterministicRng;
use crate::store::InMemoryStore;

/// Configuration for Summary DST
#[derive(Debug, Clone)]
pub struct SummaryDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Capacity of the summary under test
    pub capacity: usize,
    /// Number of distinct items in the universe
    pub num_items: u64,
    /// Largest single increment
    pub max_inc: u64,
    /// Draw items Zipf-like instead of uniformly
    pub skewed: bool,
    /// Probability of merging in a freshly built summary
    pub merge_prob: f64,
    /// Probability of a save/load round trip through the store
    pub save_load_prob: f64,
}

impl Default for SummaryDSTConfig {
    fn default() -> Self {
        SummaryDSTConfig {
            seed: 0,
            capacity: 32,
            num_items: 200,
            max_inc: 3,
            skewed: true,
            merge_prob: 0.0,
            save_load_prob: 0.02,
        }
    }
}

impl SummaryDSTConfig {
    pub fn new(seed: u64) -> Self {
        SummaryDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Tiny capacity, uniform items: constant eviction
    pub fn eviction_heavy(seed: u64) -> Self {
        SummaryDSTConfig {
            seed,
            capacity: 4,
            num_items: 50,
            max_inc: 2,
            skewed: false,
            merge_prob: 0.0,
            save_load_prob: 0.05,
        }
    }

    /// Frequent merges with other summaries
    pub fn with_merges(seed: u64) -> Self {
        SummaryDSTConfig {
            seed,
            capacity: 16,
            num_items: 100,
            max_inc: 3,
            skewed: true,
            merge_prob: 0.05,
            save_load_prob: 0.02,
        }
    }
}

/// Operation type for logging
#[derive(Debug, Clone)]
pub enum SummaryOp {
    Offer { item: String, inc: u64 },
    Merge { other_items: usize },
    MergeFiltered { other_items: usize, threshold: u64 },
    SaveLoad,
}

/// Result of a Summary DST run
#[derive(Debug, Clone)]
pub struct SummaryDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub offers: u64,
    pub evictions: u64,
    pub merges: u64,
    pub save_loads: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<SummaryOp>,
}

impl SummaryDSTResult {
    pub fn new(seed: u64) -> Self {
        SummaryDSTResult {
            seed,
            total_operations: 0,
            offers: 0,
            evictions: 0,
            merges: 0,
            save_loads: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (offers:{}, evictions:{}, merges:{}, save_loads:{}), {} violations",
            self.seed,
            self.total_operations,
            self.offers,
            self.evictions,
            self.merges,
            self.save_loads,
            self.invariant_violations.len()
        )
    }
}

/// DST harness for StreamSummary
pub struct SummaryDSTHarness {
    config: SummaryDSTConfig,
    rng: DeterministicRng,
    summary: StreamSummary,
    /// Exact counts of everything folded into `summary`
    oracle: ExactFrequencies,
    store: InMemoryStore,
    lock: StoreLock<InMemoryStore>,
    result: SummaryDSTResult,
}

impl SummaryDSTHarness {
    pub fn new(config: SummaryDSTConfig) -> Self {
        let store = InMemoryStore::new();
        let lock = StoreLock::new(store.clone(), LockConfig::test());
        SummaryDSTHarness {
            rng: DeterministicRng::new(config.seed),
            summary: StreamSummary::new(config.capacity),
            oracle: ExactFrequencies::new(),
            store,
            lock,
            result: SummaryDSTResult::new(config.seed),
            config,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(SummaryDSTConfig::new(seed))
    }

    fn random_item(&mut self) -> String {
        let idx = if self.config.skewed {
            self.rng.gen_skewed(self.config.num_items)
        } else {
            self.rng.gen_range(0, self.config.num_items)
        };
        format!("item:{}", idx)
    }

    fn random_inc(&mut self) -> u64 {
        self.rng.gen_range(1, self.config.max_inc + 1)
    }

    /// Build a second summary from its own random stream.
    fn random_other(&mut self) -> (StreamSummary, ExactFrequencies, usize) {
        let capacity = self.rng.gen_range(1, (self.config.capacity as u64) * 2 + 1) as usize;
        let ops = self.rng.gen_range(1, 200) as usize;
        let mut other = StreamSummary::new(capacity);
        let mut exact = ExactFrequencies::new();
        for _ in 0..ops {
            let item = self.random_item();
            let inc = self.random_inc();
            other.offer(&item, inc);
            exact.offer(&item, inc);
        }
        let items = other.len();
        (other, exact, items)
    }

    fn run_single_op(&mut self) {
        let roll = self.rng.gen_range(0, 1000);
        let merge_threshold = (self.config.merge_prob * 1000.0) as u64;
        let save_threshold = merge_threshold + (self.config.save_load_prob * 1000.0) as u64;

        if roll < merge_threshold {
            let (other, exact, other_items) = self.random_other();
            if self.rng.gen_bool(0.5) {
                self.result.last_op = Some(SummaryOp::Merge { other_items });
                self.summary.merge(other);
            } else {
                let threshold = other.get_k_order_stat(other_items / 2 + 1);
                self.result.last_op = Some(SummaryOp::MergeFiltered {
                    other_items,
                    threshold,
                });
                self.summary.merge_filtered(&other.filtered(threshold));
            }
            self.oracle.merge(&exact);
            self.result.merges += 1;
        } else if roll < save_threshold {
            self.result.last_op = Some(SummaryOp::SaveLoad);
            if let Err(violation) = self.save_load() {
                self.record_violation(violation);
            }
            self.result.save_loads += 1;
        } else {
            let item = self.random_item();
            let inc = self.random_inc();
            self.result.last_op = Some(SummaryOp::Offer {
                item: item.clone(),
                inc,
            });
            let evicts =
                !self.summary.key_exists(&item) && self.summary.len() == self.config.capacity;
            self.summary.offer(&item, inc);
            self.oracle.offer(&item, inc);
            self.result.offers += 1;
            if evicts {
                self.result.evictions += 1;
            }
        }

        self.result.total_operations += 1;

        if let Err(violation) = self.check_invariants() {
            self.record_violation(violation);
        }
    }

    fn record_violation(&mut self, violation: String) {
        self.result.invariant_violations.push(format!(
            "Op #{}: {:?} - {}",
            self.result.total_operations, self.result.last_op, violation
        ));
    }

    fn save_load(&mut self) -> Result<(), String> {
        let prefix = "dst";
        self.summary
            .save(&self.store, &self.lock, prefix)
            .map_err(|e| format!("save failed: {}", e))?;
        let loaded = StreamSummary::load(&self.store, prefix, 0)
            .map_err(|e| format!("load failed: {}", e))?;

        if loaded.items_freqs() != self.summary.items_freqs() {
            return Err("items_freqs differ after save/load".to_string());
        }
        if loaded.top_k(10) != self.summary.top_k(10) {
            return Err("top_k differs after save/load".to_string());
        }
        if loaded.capacity() != self.summary.capacity() {
            return Err(format!(
                "capacity {} loaded as {}",
                self.summary.capacity(),
                loaded.capacity()
            ));
        }
        self.summary = loaded;
        Ok(())
    }

    fn check_invariants(&self) -> Result<(), String> {
        // Invariant 1: Internal structure is consistent
        self.summary.check_structure()?;

        // Invariant 2: Size is min(capacity, distinct items seen). Filtered
        // merges may leave items out, so only the bound holds after merging.
        let expected_len = self.config.capacity.min(self.oracle.len());
        let len_ok = if self.result.merges == 0 {
            self.summary.len() == expected_len
        } else {
            self.summary.len() <= expected_len
        };
        if !len_ok {
            return Err(format!(
                "Length mismatch: actual={}, expected={}",
                self.summary.len(),
                expected_len
            ));
        }

        // Invariant 3: Lower bound never exceeds the true count
        let freqs = self.summary.items_freqs();
        for (item, count) in &freqs {
            let truth = self.oracle.get_freq(item);
            let lower = count - self.summary.error_of(item);
            if lower > truth {
                return Err(format!(
                    "Lower bound {} of '{}' exceeds true count {}",
                    lower, item, truth
                ));
            }
        }

        // Invariant 4: Estimates come out in non-increasing order
        if freqs.windows(2).any(|pair| pair[0].1 < pair[1].1) {
            return Err("items_freqs not in descending count order".to_string());
        }

        // Invariant 5: Order statistic is monotone in k
        for k in 1..self.summary.len() {
            let (here, next) = (
                self.summary.get_k_order_stat(k),
                self.summary.get_k_order_stat(k + 1),
            );
            if here < next {
                return Err(format!("k-order stat rises: k={} -> {}, k+1 -> {}", k, here, next));
            }
        }

        if self.result.merges > 0 {
            return Ok(());
        }

        // Merge-free runs keep the full Space-Saving guarantees.

        // Invariant 6: Upper bound covers the true count
        for (item, count) in &freqs {
            let truth = self.oracle.get_freq(item);
            if *count < truth {
                return Err(format!(
                    "Estimate {} of '{}' below true count {}",
                    count, item, truth
                ));
            }
        }

        // Invariant 7: Counts sum to the stream length
        let sum: u64 = freqs.iter().map(|(_, c)| c).sum();
        if self.config.capacity > 0 && sum != self.oracle.total() {
            return Err(format!(
                "Counts sum to {}, stream length is {}",
                sum,
                self.oracle.total()
            ));
        }

        // Invariant 8: Anything more frequent than the minimum is tracked
        if self.summary.len() == self.config.capacity {
            let min_count = freqs.last().map(|(_, c)| *c).unwrap_or(0);
            for (item, truth) in self.oracle.items_freqs() {
                if truth <= min_count {
                    break;
                }
                if !self.summary.key_exists(&item) {
                    return Err(format!(
                        "'{}' with true count {} above minimum {} is not tracked",
                        item, truth, min_count
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.run_single_op();
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
    }

    pub fn result(&self) -> &SummaryDSTResult {
        &self.result
    }

    pub fn summary(&self) -> &StreamSummary {
        &self.summary
    }

    pub fn oracle(&self) -> &ExactFrequencies {
        &self.oracle
    }
}

/// Run a batch of DST tests
pub fn run_summary_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> SummaryDSTConfig,
) -> Vec<SummaryDSTResult> {
    (0..num_seeds)
        .map(|i| {
            let seed = start_seed + i as u64;
            let mut harness = SummaryDSTHarness::new(config_fn(seed));
            harness.run(ops_per_seed);
            harness.result().clone()
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_summary_batch(results: &[SummaryDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_evictions: u64 = results.iter().map(|r| r.evictions).sum();

    let mut summary = format!(
        "Stream Summary DST\n\
         ==================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {} ({} evictions)\n",
        total, passed, failed, total_ops, total_evictions
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  Seed {}: {}\n", result.seed, result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}
