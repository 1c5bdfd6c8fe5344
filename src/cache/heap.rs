//! Expiration Heap Module
//!
//! A binary min-heap of cache keys ordered by the expiration instant of the
//! entry each key refers to. Entries that never expire sort after every
//! expiring entry, so the root is always the entry that becomes due soonest.
//!
//! The heap does not own the entries. It stores keys and resolves them through
//! an [`EntryLookup`] (the cache's key map). Every entry carries a
//! [`HeapIndex`] back-pointer which only this module can move, giving
//! O(log n) removal and re-ordering from an arbitrary position.
//!
//! Two never-expiring entries compare as equal, so their relative order is
//! unspecified and may change between runs.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::Instant;

// == Heap Index ==
/// Position of an entry inside the heap's backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapIndex(usize);

impl HeapIndex {
    /// Marks an entry that is not currently in the heap.
    pub const NOT_INDEXED: HeapIndex = HeapIndex(usize::MAX);

    /// Returns the position, or `None` for [`HeapIndex::NOT_INDEXED`].
    pub fn get(self) -> Option<usize> {
        (self != Self::NOT_INDEXED).then_some(self.0)
    }

    fn set(&mut self, index: usize) {
        self.0 = index;
    }

    fn clear(&mut self) {
        *self = Self::NOT_INDEXED;
    }
}

impl Default for HeapIndex {
    fn default() -> Self {
        Self::NOT_INDEXED
    }
}

// == Heap Entry ==
/// Capability the heap needs from the entries it orders.
pub trait HeapEntry {
    /// Absolute expiration, `None` if the entry never expires.
    fn expires_at(&self) -> Option<Instant>;

    fn heap_index(&self) -> &HeapIndex;

    /// Mutable access for the heap. Outside this module the index can only be read.
    fn heap_index_mut(&mut self) -> &mut HeapIndex;
}

/// Resolves heap keys to their entries.
///
/// A key stored in the heap must always resolve; a miss is a broken invariant
/// between the heap and the key map and panics.
pub trait EntryLookup<K> {
    type Entry: HeapEntry;

    fn lookup<Q>(&self, key: &Q) -> &Self::Entry
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized;

    fn lookup_mut<Q>(&mut self, key: &Q) -> &mut Self::Entry
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized;
}

impl<K, E, S> EntryLookup<K> for HashMap<K, E, S>
where
    K: Eq + Hash,
    E: HeapEntry,
    S: BuildHasher,
{
    type Entry = E;

    fn lookup<Q>(&self, key: &Q) -> &E
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.get(key) {
            Some(entry) => entry,
            None => panic!("expiration heap references a key missing from the entry map"),
        }
    }

    fn lookup_mut<Q>(&mut self, key: &Q) -> &mut E
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.get_mut(key) {
            Some(entry) => entry,
            None => panic!("expiration heap references a key missing from the entry map"),
        }
    }
}

/// Ordering rule: `a` sorts before `b` iff `a` expires and `b` either never
/// expires or expires later.
fn expires_before(a: Option<Instant>, b: Option<Instant>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a < b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

// == Expiration Heap ==
/// Min-heap of keys ordered by their entry's expiration.
///
/// Whenever a different key lands at the root, the heap fires its notifier with
/// `notify_waiters`. The signal is best effort: it only reaches tasks that are
/// already waiting and is dropped otherwise.
#[derive(Debug)]
pub struct ExpirationHeap<K> {
    keys: Vec<K>,
    notifier: Arc<Notify>,
}

impl<K: Hash + Eq> Default for ExpirationHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq> ExpirationHeap<K> {
    // == Constructor ==
    /// Creates an empty heap with its own notifier.
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(Notify::new()))
    }

    /// Creates an empty heap that signals root changes on `notifier`.
    pub fn with_notifier(notifier: Arc<Notify>) -> Self {
        Self {
            keys: Vec::new(),
            notifier,
        }
    }

    /// Notifier fired when the root changes.
    pub fn notifier(&self) -> &Arc<Notify> {
        &self.notifier
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    // == Peek ==
    /// Returns the root key without removing it.
    pub fn peek(&self) -> Option<&K> {
        self.keys.first()
    }

    /// Drops every key. The entries they referred to must be discarded too,
    /// their indices are left stale.
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    // == Next Expiration ==
    /// Expiration of the root entry, `None` if the heap is empty or the root
    /// never expires.
    pub fn next_expiration<S: EntryLookup<K>>(&self, store: &S) -> Option<Instant> {
        self.peek().and_then(|key| store.lookup(key).expires_at())
    }

    // == Add ==
    /// Inserts a key whose entry is already present in `store`.
    pub fn add<S: EntryLookup<K>>(&mut self, store: &mut S, key: K) {
        let index = self.keys.len();
        store.lookup_mut(&key).heap_index_mut().set(index);
        self.keys.push(key);
        if index == 0 {
            self.notify();
        }
        self.sift_up(store, index);
    }

    // == Remove ==
    /// Removes `key` from its current position. Returns `None` without
    /// touching the heap if the entry is not indexed.
    pub fn remove<Q, S>(&mut self, store: &mut S, key: &Q) -> Option<K>
    where
        S: EntryLookup<K>,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = store.lookup(key).heap_index().get()?;
        self.remove_at(store, index)
    }

    // == Update ==
    /// Restores heap order after the entry's expiration was changed.
    ///
    /// Also signals when the entry ends at the root, since a shortened root
    /// deadline changes when the next expiration is due.
    pub fn update<Q, S>(&mut self, store: &mut S, key: &Q)
    where
        S: EntryLookup<K>,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(index) = store.lookup(key).heap_index().get() else {
            return;
        };
        if !self.sift_down(store, index) {
            self.sift_up(store, index);
        }
        if store.lookup(key).heap_index().get() == Some(0) {
            self.notify();
        }
    }

    // == Pop Root ==
    /// Removes and returns the root key.
    pub fn pop_root<S: EntryLookup<K>>(&mut self, store: &mut S) -> Option<K> {
        self.remove_at(store, 0)
    }

    fn remove_at<S: EntryLookup<K>>(&mut self, store: &mut S, index: usize) -> Option<K> {
        let last = self.keys.len().checked_sub(1)?;
        if index != last {
            self.swap(store, index, last);
        }
        let key = self.keys.pop()?;
        store.lookup_mut(&key).heap_index_mut().clear();
        if index < self.keys.len() && !self.sift_down(store, index) {
            self.sift_up(store, index);
        }
        Some(key)
    }

    fn less<S: EntryLookup<K>>(&self, store: &S, i: usize, j: usize) -> bool {
        expires_before(
            store.lookup(&self.keys[i]).expires_at(),
            store.lookup(&self.keys[j]).expires_at(),
        )
    }

    fn swap<S: EntryLookup<K>>(&mut self, store: &mut S, i: usize, j: usize) {
        self.keys.swap(i, j);
        store.lookup_mut(&self.keys[i]).heap_index_mut().set(i);
        store.lookup_mut(&self.keys[j]).heap_index_mut().set(j);
        if i == 0 || j == 0 {
            self.notify();
        }
    }

    fn sift_up<S: EntryLookup<K>>(&mut self, store: &mut S, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(store, index, parent) {
                break;
            }
            self.swap(store, index, parent);
            index = parent;
        }
    }

    /// Returns true if the element moved.
    fn sift_down<S: EntryLookup<K>>(&mut self, store: &mut S, start: usize) -> bool {
        let len = self.keys.len();
        let mut index = start;
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < len && self.less(store, right, left) {
                child = right;
            }
            if !self.less(store, child, index) {
                break;
            }
            self.swap(store, index, child);
            index = child;
        }
        index > start
    }

    fn notify(&self) {
        self.notifier.notify_waiters();
    }

    /// Checks back-pointers and the heap property.
    #[cfg(test)]
    pub(crate) fn is_consistent<S: EntryLookup<K>>(&self, store: &S) -> bool {
        let indices_match = self
            .keys
            .iter()
            .enumerate()
            .all(|(i, key)| store.lookup(key).heap_index().get() == Some(i));
        let ordered = (1..self.keys.len()).all(|i| !self.less(store, i, (i - 1) / 2));
        indices_match && ordered
    }
}
