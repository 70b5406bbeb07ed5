pub mod config;
pub mod error;
pub mod lock;
pub mod simulator;
pub mod store;
pub mod summary;
pub mod tput;

pub use config::{ConfigError, LocalMode, LockConfig, PhaseWaits, ThresholdSource, TputConfig};
pub use error::TopKError;
pub use lock::{DistributedLock, LockGuard, StoreLock};
pub use store::{InMemoryStore, KvStore, StoreError};
pub use summary::{ExactFrequencies, FilteredSummary, StreamSummary};
pub use tput::{SyncReport, TputNode};
