//! Distributed mutual exclusion over the shared store.
//!
//! [`StoreLock`] is a single-instance Redlock: `SET key token NX PX ttl` to
//! take the lock and a compare-and-delete on the token to release it.
//! [`FlakyLock`] wraps any lock and injects acquisition failures for
//! simulation. [`LockGuard`] releases on drop.

mod flaky;
mod store_lock;

pub use flaky::{FlakyLock, FlakyLockConfig, FlakyLockStats};
pub use store_lock::StoreLock;

use crate::config::LockConfig;
use std::time::Duration;

/// Lock client for one node.
///
/// A client remembers which keys it holds; acquiring a key it already holds
/// releases the old lease first. Failures are reported as `false`, never as
/// errors, so callers can skip the guarded step.
pub trait DistributedLock: Send + Sync {
    /// Retry until `timeout` elapses. At least one attempt is always made.
    fn acquire(&self, key: &str, ttl: Duration, timeout: Duration) -> bool;

    /// Single attempt with the client's short lease.
    fn try_acquire(&self, key: &str) -> bool;

    /// Release a held key. Returns false if this client did not hold it or
    /// the lease had already expired.
    fn release(&self, key: &str) -> bool;

    /// Lease and retry settings of this client.
    fn settings(&self) -> &LockConfig;

    /// Blocking acquire with the client's configured lease and timeout.
    fn lock_default(&self, key: &str) -> Option<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        let settings = self.settings();
        self.lock(key, settings.ttl, settings.acquire_timeout)
    }

    /// Blocking acquire returning a guard that releases on drop.
    fn lock(&self, key: &str, ttl: Duration, timeout: Duration) -> Option<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.acquire(key, ttl, timeout).then(|| LockGuard::new(self, key))
    }

    /// Single-attempt acquire returning a guard that releases on drop.
    fn try_lock(&self, key: &str) -> Option<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.try_acquire(key).then(|| LockGuard::new(self, key))
    }
}

/// Held lock; released when dropped.
pub struct LockGuard<'a, L: DistributedLock> {
    lock: &'a L,
    key: String,
}

impl<'a, L: DistributedLock> LockGuard<'a, L> {
    fn new(lock: &'a L, key: &str) -> Self {
        LockGuard {
            lock,
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<L: DistributedLock> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        if !self.lock.release(&self.key) {
            tracing::debug!(key = %self.key, "lock lease expired before release");
        }
    }
}

impl<L: DistributedLock + std::fmt::Debug> std::fmt::Debug for LockGuard<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}
