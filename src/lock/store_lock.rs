use super::DistributedLock;
use crate::config::LockConfig;
use crate::store::KvStore;
use ahash::AHashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Redlock with a quorum of one, layered on a [`KvStore`].
pub struct StoreLock<S: KvStore> {
    store: S,
    config: LockConfig,
    /// Keys this client holds, with the token written into each.
    held: Mutex<AHashMap<String, String>>,
}

impl<S: KvStore> StoreLock<S> {
    pub fn new(store: S, config: LockConfig) -> Self {
        StoreLock {
            store,
            config,
            held: Mutex::new(AHashMap::new()),
        }
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held.lock().contains_key(key)
    }

    fn new_token() -> String {
        format!("{:032x}", rand::thread_rng().gen::<u128>())
    }

    /// Expiry precision of 1ms plus 1ms minimum drift for small TTLs.
    fn drift(&self, ttl: Duration) -> Duration {
        ttl.mul_f64(self.config.clock_drift_factor) + Duration::from_millis(2)
    }

    fn attempt(&self, key: &str, token: &str, ttl: Duration) -> bool {
        let started = Instant::now();
        let acquired = match self.store.set_nx_px(key, token, ttl) {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(key, error = %e, "lock attempt failed");
                false
            }
        };
        if !acquired {
            return false;
        }

        let spent = started.elapsed() + self.drift(ttl);
        if spent < ttl {
            return true;
        }
        // Lease already consumed by the time we got it.
        self.delete_if_owned(key, token);
        false
    }

    fn delete_if_owned(&self, key: &str, token: &str) -> bool {
        match self.store.compare_and_del(key, token) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(key, error = %e, "lock release failed");
                false
            }
        }
    }

    fn retry_pause(&self) {
        let max = self.config.retry_delay.as_millis() as u64;
        if max == 0 {
            return;
        }
        let jittered = rand::thread_rng().gen_range(max / 2..=max);
        std::thread::sleep(Duration::from_millis(jittered));
    }

    fn acquire_with(&self, key: &str, ttl: Duration, timeout: Option<Duration>) -> bool {
        if self.is_held(key) {
            self.release(key);
        }

        let token = Self::new_token();
        let started = Instant::now();
        loop {
            if self.attempt(key, &token, ttl) {
                self.held.lock().insert(key.to_string(), token);
                debug!(key, ttl_ms = ttl.as_millis() as u64, "lock acquired");
                return true;
            }
            match timeout {
                Some(timeout) if started.elapsed() < timeout => self.retry_pause(),
                _ => return false,
            }
        }
    }
}

impl<S: KvStore> DistributedLock for StoreLock<S> {
    fn acquire(&self, key: &str, ttl: Duration, timeout: Duration) -> bool {
        self.acquire_with(key, ttl, Some(timeout))
    }

    fn try_acquire(&self, key: &str) -> bool {
        self.acquire_with(key, self.config.try_lock_ttl, None)
    }

    fn release(&self, key: &str) -> bool {
        let Some(token) = self.held.lock().remove(key) else {
            return false;
        };
        self.delete_if_owned(key, &token)
    }

    fn settings(&self) -> &LockConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn lock_on(store: &InMemoryStore) -> StoreLock<InMemoryStore> {
        StoreLock::new(store.clone(), LockConfig::test())
    }

    #[test]
    fn test_acquire_release() {
        let store = InMemoryStore::new();
        let lock = lock_on(&store);
        assert!(lock.acquire("w", Duration::from_secs(1), Duration::from_millis(50)));
        assert!(lock.is_held("w"));
        assert!(store.exists("w").unwrap());

        assert!(lock.release("w"));
        assert!(!store.exists("w").unwrap());
        assert!(!lock.release("w"));
    }

    #[test]
    fn test_contention_times_out() {
        let store = InMemoryStore::new();
        let first = lock_on(&store);
        let second = lock_on(&store);
        assert!(first.try_acquire("w"));

        let started = Instant::now();
        assert!(!second.acquire("w", Duration::from_secs(1), Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(!second.try_acquire("w"));

        // A stranger cannot release a lease it does not own
        assert!(!second.release("w"));
        assert!(store.exists("w").unwrap());
    }

    #[test]
    fn test_reacquire_replaces_own_lease() {
        let store = InMemoryStore::new();
        let lock = lock_on(&store);
        assert!(lock.try_acquire("w"));
        let first_token = store.get("w").unwrap();

        assert!(lock.try_acquire("w"));
        let second_token = store.get("w").unwrap();
        assert_ne!(first_token, second_token);
    }

    #[test]
    fn test_expired_lease_can_be_taken() {
        let store = InMemoryStore::new();
        let first = lock_on(&store);
        let second = lock_on(&store);
        assert!(first.acquire("w", Duration::from_millis(10), Duration::ZERO));
        std::thread::sleep(Duration::from_millis(25));

        assert!(second.try_acquire("w"));
        // First lease is gone; its release must not delete the new one
        assert!(!first.release("w"));
        assert!(store.exists("w").unwrap());
    }

    #[test]
    fn test_ttl_below_drift_never_succeeds() {
        let store = InMemoryStore::new();
        let lock = lock_on(&store);
        assert!(!lock.acquire("w", Duration::from_millis(1), Duration::ZERO));
        assert!(!store.exists("w").unwrap());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let store = InMemoryStore::new();
        let lock = lock_on(&store);
        {
            let guard = lock.try_lock("w").expect("uncontended lock");
            assert_eq!(guard.key(), "w");
            assert!(store.exists("w").unwrap());
        }
        assert!(!store.exists("w").unwrap());
        assert!(!lock.is_held("w"));
    }
}
