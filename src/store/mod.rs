//! Key-value store seam.
//!
//! The protocol only needs a small Redis-shaped command set: scalar strings,
//! counters, hashes, lists, bulk delete and the two atomic primitives the
//! distributed lock is built on (`set_nx_px`, `compare_and_del`). Values are
//! strings; integers are stored in decimal.

mod memory;

pub use memory::InMemoryStore;

use std::time::Duration;

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Key holds a value of another type
    WrongType(String),
    /// Value is not a decimal integer
    NotInteger(String),
    /// Backend cannot serve the request
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::WrongType(key) => write!(
                f,
                "WRONGTYPE Operation against key '{}' holding the wrong kind of value",
                key
            ),
            StoreError::NotInteger(key) => {
                write!(f, "value at '{}' is not an integer or out of range", key)
            }
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Store abstraction shared by every node.
///
/// Implementations must be safe to call from several threads at once; each
/// call is atomic on its own, nothing spans calls.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set only if absent, expiring after `ttl`. Returns whether the key was set.
    fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `expected`.
    fn compare_and_del(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Add `delta` to an integer value, treating a missing key as 0.
    fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete every listed key, returning how many existed.
    fn del(&self, keys: &[&str]) -> Result<usize, StoreError>;

    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    fn hset_all(&self, key: &str, entries: &[(String, String)]) -> Result<(), StoreError>;

    fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Append to a list, returning its new length.
    fn rpush(&self, key: &str, value: &str) -> Result<usize, StoreError>;

    fn lindex(&self, key: &str, index: usize) -> Result<Option<String>, StoreError>;

    fn llen(&self, key: &str) -> Result<usize, StoreError>;
}
