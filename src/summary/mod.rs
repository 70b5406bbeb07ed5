//! Frequency estimation.
//!
//! [`StreamSummary`] is the bounded Space-Saving estimator used by every
//! node; [`ExactFrequencies`] is its unbounded exact counterpart. Summaries
//! persist to a [`KvStore`](crate::store::KvStore) through the codec in
//! [`codec`].

pub mod arena;
mod bucket;
pub mod codec;
mod counter;
mod exact;
pub mod linked_list;
mod stream_summary;
pub mod summary_dst;

pub use arena::{BucketId, CounterId, SlotArena};
pub use bucket::Bucket;
pub use codec::RecordKeys;
pub use counter::Counter;
pub use exact::ExactFrequencies;
pub use linked_list::{Chain, Linked, Links};
pub use stream_summary::{FilteredSummary, StreamSummary};
pub use summary_dst::{
    run_summary_batch, summarize_summary_batch, SummaryDSTConfig, SummaryDSTHarness,
    SummaryDSTResult, SummaryOp,
};
