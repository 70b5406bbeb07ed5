use super::arena::{BucketId, CounterId};
use super::linked_list::{Linked, Links};

/// One tracked item.
///
/// `count` is an upper bound on the item's true frequency and
/// `count - error` a lower bound. `error` is the count the slot inherited
/// when it was taken over from an evicted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub item: String,
    pub count: u64,
    pub error: u64,
    pub(crate) bucket: BucketId,
    pub(crate) links: Links<CounterId>,
}

impl Counter {
    pub(crate) fn new(item: String, bucket: BucketId) -> Self {
        Counter {
            item,
            count: 0,
            error: 0,
            bucket,
            links: Links::default(),
        }
    }

    /// Guaranteed lower bound on the true frequency.
    #[inline]
    pub fn lower_bound(&self) -> u64 {
        self.count.saturating_sub(self.error)
    }

    pub fn bucket(&self) -> BucketId {
        self.bucket
    }
}

impl Linked<CounterId> for Counter {
    fn links(&self) -> &Links<CounterId> {
        &self.links
    }

    fn links_mut(&mut self) -> &mut Links<CounterId> {
        &mut self.links
    }
}
