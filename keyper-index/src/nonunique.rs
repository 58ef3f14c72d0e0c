use std::collections::HashMap;

use keyper_core::{Key, Keyed};

use crate::unique::UniqueIndex;

/// A mapping from stringified foreign-key value to the frozen [`UniqueIndex`] of
/// entities sharing that value. Empty buckets are pruned eagerly so a stale back-
/// reference lookup never finds a phantom bucket (spec.md §3, "NonUniqueIndex").
#[derive(Debug, Clone)]
pub struct NonUniqueIndex<T> {
    buckets: HashMap<String, UniqueIndex<T>>,
}

impl<T> Default for NonUniqueIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> NonUniqueIndex<T> {
    pub fn new() -> Self {
        NonUniqueIndex {
            buckets: HashMap::new(),
        }
    }

    pub fn bucket(&self, key: &str) -> Option<&UniqueIndex<T>> {
        self.buckets.get(key)
    }

    pub fn bucket_len(&self, key: &str) -> usize {
        self.buckets.get(key).map(UniqueIndex::len).unwrap_or(0)
    }
}

impl<T: Keyed + Clone> NonUniqueIndex<T> {
    /// The bucket for `key`, or a fresh empty frozen index if none exists yet —
    /// mirrors the spec's "empty singleton index" fallback for back-reference reads.
    pub fn bucket_or_empty(&self, key: &str) -> UniqueIndex<T> {
        self.buckets
            .get(key)
            .cloned()
            .unwrap_or_else(UniqueIndex::new_frozen)
    }

    /// File `item` under `key`'s bucket, creating the bucket if needed.
    pub fn insert(&mut self, key: String, item: T) {
        let bucket = self.buckets.entry(key).or_insert_with(UniqueIndex::new_frozen);
        *bucket = bucket.with_added([item]);
    }

    /// Remove `pk` from `key`'s bucket, pruning the bucket if it becomes empty.
    pub fn remove(&mut self, key: &str, pk: &Key) {
        if let Some(bucket) = self.buckets.get_mut(key) {
            *bucket = bucket.with_removed([pk]);
            if bucket.is_empty() {
                self.buckets.remove(key);
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.buckets.keys()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyper_core::{Entity, KeyPart};

    fn entity(pk: i64, group: &str) -> Entity {
        let mut fields = serde_json::Map::new();
        fields.insert("pk".into(), serde_json::json!(pk));
        fields.insert("group".into(), serde_json::json!(group));
        Entity::new(fields, Key::single(KeyPart::Number(pk as f64)), "widgets")
    }

    #[test]
    fn inserting_buckets_by_key() {
        let mut idx = NonUniqueIndex::new();
        idx.insert("g1".into(), entity(1, "g1"));
        idx.insert("g1".into(), entity(2, "g1"));
        idx.insert("g2".into(), entity(3, "g2"));
        assert_eq!(idx.bucket_len("g1"), 2);
        assert_eq!(idx.bucket_len("g2"), 1);
    }

    #[test]
    fn empty_buckets_are_pruned() {
        let mut idx = NonUniqueIndex::new();
        let pk = Key::single(KeyPart::Number(1.0));
        idx.insert("g1".into(), entity(1, "g1"));
        idx.remove("g1", &pk);
        assert!(idx.bucket("g1").is_none());
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn missing_bucket_falls_back_to_empty_singleton() {
        let idx: NonUniqueIndex<Entity> = NonUniqueIndex::new();
        let bucket = idx.bucket_or_empty("nope");
        assert!(bucket.is_empty());
    }
}
