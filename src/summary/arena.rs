//! Slot arena backing counters and buckets.
//!
//! Values are addressed by typed integer ids. Freed slots are reused through a
//! free list, so an id stays valid until its value is removed.

/// Typed index into a [`SlotArena`].
pub trait SlotKey: Copy + Eq + std::fmt::Debug {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

/// Id of a counter slot inside a stream summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterId(pub(crate) usize);

/// Id of a bucket slot inside a stream summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId(pub(crate) usize);

impl SlotKey for CounterId {
    fn from_index(index: usize) -> Self {
        CounterId(index)
    }

    fn index(self) -> usize {
        self.0
    }
}

impl SlotKey for BucketId {
    fn from_index(index: usize) -> Self {
        BucketId(index)
    }

    fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct SlotArena<K, T> {
    slots: Vec<Option<T>>,
    free_list: Vec<usize>,
    len: usize,
    _key: std::marker::PhantomData<K>,
}

impl<K: SlotKey, T> SlotArena<K, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            _key: std::marker::PhantomData,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
            _key: std::marker::PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> K {
        let idx = if let Some(idx) = self.free_list.pop() {
            self.slots[idx] = Some(value);
            idx
        } else {
            self.slots.push(Some(value));
            self.slots.len() - 1
        };
        self.len += 1;
        K::from_index(idx)
    }

    pub fn remove(&mut self, id: K) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        let value = slot.take()?;
        self.free_list.push(id.index());
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: K) -> Option<&T> {
        self.slots.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: K) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    pub fn contains(&self, id: K) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|value| (K::from_index(idx), value)))
    }
}

impl<K: SlotKey, T> Default for SlotArena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SlotKey, T> std::ops::Index<K> for SlotArena<K, T> {
    type Output = T;

    fn index(&self, id: K) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("dangling arena id {:?}", id),
        }
    }
}

impl<K: SlotKey, T> std::ops::IndexMut<K> for SlotArena<K, T> {
    fn index_mut(&mut self, id: K) -> &mut T {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("dangling arena id {:?}", id),
        }
    }
}
