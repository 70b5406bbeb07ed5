//! Doubly linked ordering over a [`SlotArena`].
//!
//! The chain records only its tail and length; `prev`/`next` links live on the
//! arena entries themselves. An entry can therefore be unlinked from one chain
//! and linked into another while keeping its id, which is how counters move
//! between buckets.
//!
//! ```text
//!   first()                                  last()
//!     │                                        │
//!     ▼                                        ▼
//!   [id_4] ◄──prev── [id_1] ◄──prev── [id_7]
//!          ──next──►        ──next──►
//! ```
//!
//! | Operation       | Time |
//! |-----------------|------|
//! | `push_back`     | O(1) |
//! | `insert_before` | O(1) |
//! | `unlink`        | O(1) |
//! | `last`          | O(1) |
//! | `first`         | O(n) |
//!
//! Membership is a caller contract: passing an id that belongs to another
//! chain corrupts both.

use super::arena::{SlotArena, SlotKey};

/// Neighbor links stored on a chained entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Links<K> {
    pub prev: Option<K>,
    pub next: Option<K>,
}

impl<K> Default for Links<K> {
    fn default() -> Self {
        Links {
            prev: None,
            next: None,
        }
    }
}

/// An arena entry that can be threaded onto a [`Chain`].
pub trait Linked<K> {
    fn links(&self) -> &Links<K>;
    fn links_mut(&mut self) -> &mut Links<K>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain<K> {
    last: Option<K>,
    len: usize,
}

impl<K: SlotKey> Chain<K> {
    pub fn new() -> Self {
        Chain { last: None, len: 0 }
    }

    /// Rebuild a chain whose entries are already linked to each other.
    pub(crate) fn from_raw(last: Option<K>, len: usize) -> Self {
        Chain { last, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn last(&self) -> Option<K> {
        self.last
    }

    /// Walks backward from the tail until an entry has no predecessor.
    pub fn first<T: Linked<K>>(&self, arena: &SlotArena<K, T>) -> Option<K> {
        let mut current = self.last?;
        while let Some(prev) = arena[current].links().prev {
            current = prev;
        }
        Some(current)
    }

    pub fn prev<T: Linked<K>>(&self, arena: &SlotArena<K, T>, id: K) -> Option<K> {
        arena[id].links().prev
    }

    pub fn next<T: Linked<K>>(&self, arena: &SlotArena<K, T>, id: K) -> Option<K> {
        arena[id].links().next
    }

    /// Allocate `value` and append it at the tail.
    pub fn push_back<T: Linked<K>>(&mut self, arena: &mut SlotArena<K, T>, value: T) -> K {
        let id = arena.insert(value);
        self.link_back(arena, id);
        id
    }

    /// Allocate `value` and link it before `before`, or at the tail when `before` is `None`.
    pub fn insert_before<T: Linked<K>>(
        &mut self,
        arena: &mut SlotArena<K, T>,
        value: T,
        before: Option<K>,
    ) -> K {
        let id = arena.insert(value);
        self.link_before(arena, id, before);
        id
    }

    /// Link an already allocated, currently unlinked entry at the tail.
    pub fn link_back<T: Linked<K>>(&mut self, arena: &mut SlotArena<K, T>, id: K) {
        let old_last = self.last;
        {
            let links = arena[id].links_mut();
            links.prev = old_last;
            links.next = None;
        }
        if let Some(old_last) = old_last {
            arena[old_last].links_mut().next = Some(id);
        }
        self.last = Some(id);
        self.len += 1;
    }

    /// Link an already allocated, currently unlinked entry before `before`.
    pub fn link_before<T: Linked<K>>(
        &mut self,
        arena: &mut SlotArena<K, T>,
        id: K,
        before: Option<K>,
    ) {
        let Some(before) = before else {
            self.link_back(arena, id);
            return;
        };
        let prev = arena[before].links().prev;
        {
            let links = arena[id].links_mut();
            links.prev = prev;
            links.next = Some(before);
        }
        if let Some(prev) = prev {
            arena[prev].links_mut().next = Some(id);
        }
        arena[before].links_mut().prev = Some(id);
        self.len += 1;
    }

    /// Detach `id` from the chain, leaving it allocated in the arena.
    pub fn unlink<T: Linked<K>>(&mut self, arena: &mut SlotArena<K, T>, id: K) {
        let Links { prev, next } = *arena[id].links();
        if self.last == Some(id) {
            self.last = prev;
        }
        if let Some(prev) = prev {
            arena[prev].links_mut().next = next;
        }
        if let Some(next) = next {
            arena[next].links_mut().prev = prev;
        }
        *arena[id].links_mut() = Links::default();
        self.len -= 1;
    }

    /// Detach `id` and free its slot.
    pub fn remove<T: Linked<K>>(&mut self, arena: &mut SlotArena<K, T>, id: K) -> Option<T> {
        self.unlink(arena, id);
        arena.remove(id)
    }

    pub fn iter_forward<'a, T: Linked<K>>(&self, arena: &'a SlotArena<K, T>) -> ChainIter<'a, K, T> {
        ChainIter {
            arena,
            current: self.first(arena),
            forward: true,
        }
    }

    pub fn iter_backward<'a, T: Linked<K>>(
        &self,
        arena: &'a SlotArena<K, T>,
    ) -> ChainIter<'a, K, T> {
        ChainIter {
            arena,
            current: self.last,
            forward: false,
        }
    }

    /// Validate link symmetry and length against the arena.
    pub fn check<T: Linked<K>>(&self, arena: &SlotArena<K, T>) -> Result<(), String> {
        let mut count = 0usize;
        let mut current = self.last;
        let mut expected_next = None;
        while let Some(id) = current {
            let Some(entry) = arena.get(id) else {
                return Err(format!("chain entry {:?} missing from arena", id));
            };
            if entry.links().next != expected_next {
                return Err(format!(
                    "entry {:?} has next {:?}, expected {:?}",
                    id,
                    entry.links().next,
                    expected_next
                ));
            }
            count += 1;
            if count > self.len {
                return Err(format!("chain longer than recorded len {}", self.len));
            }
            expected_next = Some(id);
            current = entry.links().prev;
        }
        if count != self.len {
            return Err(format!("chain has {} entries, recorded len {}", count, self.len));
        }
        Ok(())
    }
}

impl<K: SlotKey> Default for Chain<K> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChainIter<'a, K, T> {
    arena: &'a SlotArena<K, T>,
    current: Option<K>,
    forward: bool,
}

impl<'a, K: SlotKey, T: Linked<K>> Iterator for ChainIter<'a, K, T> {
    type Item = (K, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let entry = &self.arena[id];
        self.current = if self.forward {
            entry.links().next
        } else {
            entry.links().prev
        };
        Some((id, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::arena::CounterId;

    #[derive(Debug)]
    struct Node {
        value: u32,
        links: Links<CounterId>,
    }

    impl Node {
        fn new(value: u32) -> Self {
            Node {
                value,
                links: Links::default(),
            }
        }
    }

    impl Linked<CounterId> for Node {
        fn links(&self) -> &Links<CounterId> {
            &self.links
        }

        fn links_mut(&mut self) -> &mut Links<CounterId> {
            &mut self.links
        }
    }

    fn values(chain: &Chain<CounterId>, arena: &SlotArena<CounterId, Node>) -> Vec<u32> {
        chain.iter_forward(arena).map(|(_, n)| n.value).collect()
    }

    #[test]
    fn test_push_back_and_first() {
        let mut arena = SlotArena::new();
        let mut chain = Chain::new();
        assert_eq!(chain.first(&arena), None);

        let a = chain.push_back(&mut arena, Node::new(1));
        let b = chain.push_back(&mut arena, Node::new(2));
        assert_eq!(chain.first(&arena), Some(a));
        assert_eq!(chain.last(), Some(b));
        assert_eq!(values(&chain, &arena), vec![1, 2]);
        chain.check(&arena).unwrap();
    }

    #[test]
    fn test_insert_before() {
        let mut arena = SlotArena::new();
        let mut chain = Chain::new();
        let a = chain.push_back(&mut arena, Node::new(1));
        let c = chain.push_back(&mut arena, Node::new(3));

        chain.insert_before(&mut arena, Node::new(2), Some(c));
        chain.insert_before(&mut arena, Node::new(0), Some(a));
        chain.insert_before(&mut arena, Node::new(4), None);

        assert_eq!(values(&chain, &arena), vec![0, 1, 2, 3, 4]);
        assert_eq!(chain.len(), 5);
        chain.check(&arena).unwrap();
    }

    #[test]
    fn test_unlink_head_middle_tail() {
        let mut arena = SlotArena::new();
        let mut chain = Chain::new();
        let ids: Vec<_> = (0..5).map(|v| chain.push_back(&mut arena, Node::new(v))).collect();

        chain.unlink(&mut arena, ids[0]);
        chain.unlink(&mut arena, ids[2]);
        chain.remove(&mut arena, ids[4]);

        assert_eq!(values(&chain, &arena), vec![1, 3]);
        assert_eq!(chain.last(), Some(ids[3]));
        assert!(arena.contains(ids[0]));
        assert!(!arena.contains(ids[4]));
        chain.check(&arena).unwrap();
    }

    #[test]
    fn test_relink_into_other_chain_keeps_id() {
        let mut arena = SlotArena::new();
        let mut left = Chain::new();
        let mut right = Chain::new();
        let moved = left.push_back(&mut arena, Node::new(7));
        left.push_back(&mut arena, Node::new(8));
        right.push_back(&mut arena, Node::new(9));

        left.unlink(&mut arena, moved);
        right.link_back(&mut arena, moved);

        assert_eq!(values(&left, &arena), vec![8]);
        assert_eq!(values(&right, &arena), vec![9, 7]);
        assert_eq!(right.last(), Some(moved));
        left.check(&arena).unwrap();
        right.check(&arena).unwrap();
    }

    #[test]
    fn test_iter_backward() {
        let mut arena = SlotArena::new();
        let mut chain = Chain::new();
        for v in 0..4 {
            chain.push_back(&mut arena, Node::new(v));
        }
        let back: Vec<_> = chain.iter_backward(&arena).map(|(_, n)| n.value).collect();
        assert_eq!(back, vec![3, 2, 1, 0]);
    }
}
