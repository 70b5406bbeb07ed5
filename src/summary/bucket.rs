use super::arena::{BucketId, CounterId};
use super::linked_list::{Chain, Linked, Links};

/// Group of counters that share one exact count.
///
/// Buckets are chained in strictly descending count order; new members are
/// appended at the tail of `members`, and eviction takes the tail of the
/// minimum bucket.
#[derive(Debug, Clone)]
pub struct Bucket {
    /// Stable id, persisted as-is by the codec.
    pub id: u64,
    pub count: u64,
    pub(crate) members: Chain<CounterId>,
    pub(crate) links: Links<BucketId>,
}

impl Bucket {
    pub(crate) fn new(id: u64, count: u64) -> Self {
        Bucket {
            id,
            count,
            members: Chain::new(),
            links: Links::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Linked<BucketId> for Bucket {
    fn links(&self) -> &Links<BucketId> {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links<BucketId> {
        &mut self.links
    }
}
