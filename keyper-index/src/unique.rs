use std::collections::BTreeMap;
use std::sync::Arc;

use keyper_core::{Key, Keyed};

/// A pk-keyed sorted sequence of items with O(log n) lookup and ascending
/// pk-order iteration (spec.md §4.2).
///
/// The underlying map is held behind an `Arc` so that a frozen index can be cloned
/// cheaply and shared (by the query cache, by non-unique-index buckets, by a view's
/// last-loaded snapshot) without the clone-on-write cost showing up until something
/// actually mutates it. This is the Rust stand-in for the spec's persistent sorted
/// map / copy-on-write pair (Design Notes, spec.md §9): the pack has no off-the-shelf
/// persistent map crate, so `Arc<BTreeMap<_>>` plus copy-on-write on `with_added` /
/// `with_removed` is the idiomatic choice here.
#[derive(Debug, Clone)]
pub struct UniqueIndex<T> {
    map: Arc<BTreeMap<Key, T>>,
    frozen: bool,
}

impl<T> Default for UniqueIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UniqueIndex<T> {
    /// A new, empty, mutable index.
    pub fn new() -> Self {
        UniqueIndex {
            map: Arc::new(BTreeMap::new()),
            frozen: false,
        }
    }

    /// A new, empty, frozen index.
    pub fn new_frozen() -> Self {
        UniqueIndex {
            map: Arc::new(BTreeMap::new()),
            frozen: true,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, pk: &Key) -> Option<&T> {
        self.map.get(pk)
    }

    pub fn has(&self, pk: &Key) -> bool {
        self.map.contains_key(pk)
    }

    /// Iterate items in ascending pk order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.map.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.map.keys()
    }

    /// An independent copy of this index, optionally frozen.
    pub fn copy(&self, freeze: bool) -> Self
    where
        T: Clone,
    {
        UniqueIndex {
            map: Arc::new((*self.map).clone()),
            frozen: freeze,
        }
    }

    /// Freeze this index in place (no-op if already frozen; otherwise subsequent
    /// mutation must go through `with_added`/`with_removed`).
    pub fn freeze(mut self) -> Self {
        self.frozen = true;
        self
    }
}

impl<T: Keyed + Clone> UniqueIndex<T> {
    /// Build a frozen index from an initial batch of items (replacing on pk
    /// collision, last write wins).
    pub fn from_items_frozen(items: impl IntoIterator<Item = T>) -> Self {
        let mut idx = UniqueIndex::new();
        idx.add_mut(items);
        idx.freeze()
    }

    /// Insert items in place, replacing on pk collision. Panics if the index is
    /// frozen — frozen indexes must go through [`UniqueIndex::with_added`] so the
    /// old snapshot any other holder has stays untouched.
    pub fn add_mut(&mut self, items: impl IntoIterator<Item = T>) {
        assert!(!self.frozen, "cannot mutate a frozen UniqueIndex in place");
        let map = Arc::make_mut(&mut self.map);
        for item in items {
            map.insert(item.pk().clone(), item);
        }
    }

    /// Remove pks in place. Panics if the index is frozen.
    pub fn remove_mut<'a>(&mut self, pks: impl IntoIterator<Item = &'a Key>) {
        assert!(!self.frozen, "cannot mutate a frozen UniqueIndex in place");
        let map = Arc::make_mut(&mut self.map);
        for pk in pks {
            map.remove(pk);
        }
    }

    /// Non-mutating insert: returns a new frozen index with `items` merged in,
    /// leaving `self` and any other holder of it untouched.
    pub fn with_added(&self, items: impl IntoIterator<Item = T>) -> Self {
        let mut next = (*self.map).clone();
        for item in items {
            next.insert(item.pk().clone(), item);
        }
        UniqueIndex {
            map: Arc::new(next),
            frozen: true,
        }
    }

    /// Non-mutating remove: returns a new frozen index with `pks` removed.
    pub fn with_removed<'a>(&self, pks: impl IntoIterator<Item = &'a Key>) -> Self {
        let mut next = (*self.map).clone();
        for pk in pks {
            next.remove(pk);
        }
        UniqueIndex {
            map: Arc::new(next),
            frozen: true,
        }
    }
}

impl<'a, T> IntoIterator for &'a UniqueIndex<T> {
    type Item = &'a T;
    type IntoIter = std::collections::btree_map::Values<'a, Key, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.values()
    }
}
