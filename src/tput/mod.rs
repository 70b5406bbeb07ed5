//! Distributed top-K over node-local word summaries.
//!
//! Nodes count words into a [`StreamSummary`](crate::summary::StreamSummary)
//! and, once per window, run the three-phase threshold protocol against the
//! shared store. The answer lands under `<window>Result`. Nodes may count
//! exactly instead ([`LocalMode::Exact`](crate::config::LocalMode)) and may
//! save their counts per window for a separate process to sync.

mod keys;
mod local;
mod node;
pub mod tokenizer;
pub mod window;

pub use keys::WindowKeys;
pub use local::LocalCounts;
pub use node::{Phase, PhaseReport, SyncReport, TputNode};
pub use tokenizer::tokenize;
pub use window::{previous_window, window_start};
