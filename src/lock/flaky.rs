use super::DistributedLock;
use crate::config::LockConfig;
use crate::simulator::DeterministicRng;
use parking_lot::Mutex;
use std::time::Duration;

/// Fault probabilities for [`FlakyLock`]
#[derive(Debug, Clone)]
pub struct FlakyLockConfig {
    pub seed: u64,
    /// Probability a blocking acquire reports failure without trying
    pub acquire_fail_prob: f64,
    /// Probability a single-attempt acquire reports failure without trying
    pub try_fail_prob: f64,
}

impl FlakyLockConfig {
    pub fn new(seed: u64) -> Self {
        FlakyLockConfig {
            seed,
            acquire_fail_prob: 0.1,
            try_fail_prob: 0.1,
        }
    }

    /// Every acquisition fails
    pub fn always_fail(seed: u64) -> Self {
        FlakyLockConfig {
            seed,
            acquire_fail_prob: 1.0,
            try_fail_prob: 1.0,
        }
    }

    /// Only completion attempts fail
    pub fn completion_only(seed: u64, prob: f64) -> Self {
        FlakyLockConfig {
            seed,
            acquire_fail_prob: 0.0,
            try_fail_prob: prob,
        }
    }
}

/// Counts of checked and injected faults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlakyLockStats {
    pub acquire_checks: u64,
    pub acquire_injected: u64,
    pub try_checks: u64,
    pub try_injected: u64,
}

/// Lock wrapper that makes acquisitions fail on a seeded schedule.
pub struct FlakyLock<L> {
    inner: L,
    config: FlakyLockConfig,
    rng: Mutex<DeterministicRng>,
    stats: Mutex<FlakyLockStats>,
}

impl<L: DistributedLock> FlakyLock<L> {
    pub fn new(inner: L, config: FlakyLockConfig) -> Self {
        FlakyLock {
            inner,
            rng: Mutex::new(DeterministicRng::new(config.seed)),
            config,
            stats: Mutex::new(FlakyLockStats::default()),
        }
    }

    pub fn stats(&self) -> FlakyLockStats {
        self.stats.lock().clone()
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: DistributedLock> DistributedLock for FlakyLock<L> {
    fn acquire(&self, key: &str, ttl: Duration, timeout: Duration) -> bool {
        let inject = self.rng.lock().gen_bool(self.config.acquire_fail_prob);
        {
            let mut stats = self.stats.lock();
            stats.acquire_checks += 1;
            if inject {
                stats.acquire_injected += 1;
            }
        }
        if inject {
            tracing::debug!(key, "injected lock acquisition failure");
            return false;
        }
        self.inner.acquire(key, ttl, timeout)
    }

    fn try_acquire(&self, key: &str) -> bool {
        let inject = self.rng.lock().gen_bool(self.config.try_fail_prob);
        {
            let mut stats = self.stats.lock();
            stats.try_checks += 1;
            if inject {
                stats.try_injected += 1;
            }
        }
        if inject {
            tracing::debug!(key, "injected try-lock failure");
            return false;
        }
        self.inner.try_acquire(key)
    }

    fn release(&self, key: &str) -> bool {
        self.inner.release(key)
    }

    fn settings(&self) -> &LockConfig {
        self.inner.settings()
    }
}
