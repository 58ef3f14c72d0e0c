use std::collections::HashMap;

use keyper_core::{Entity, Key};
use keyper_index::{NonUniqueIndex, UniqueIndex};
use keyper_query::Criteria;
use serde_json::Value;

/// A back-reference this collection exposes on *another* collection's entities:
/// "given an entity of mine, give me every entity in `source_collection` whose
/// `foreign_key_field` equals my pk" (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct BackRefInfo {
    pub source_collection: String,
    pub foreign_key_field: String,
}

/// One entry in the query-result cache: the parsed predicate it was computed from
/// (for soundness re-checks) plus the frozen snapshot of matching entities
/// (spec.md §3, "Collection state").
#[derive(Clone)]
pub struct CachedQuery {
    pub where_raw: Value,
    pub where_criteria: Criteria,
    pub items: UniqueIndex<Entity>,
}

/// The mutable cache state of a `Collection`: the primary index, lazily-created
/// secondary indexes, and the query-result cache. Held behind a single lock so
/// insert/remove can update all three in lockstep within one synchronous section
/// (spec.md §5, "maintained in lockstep ... within the same synchronous section").
#[derive(Default)]
pub struct CollectionState {
    pub index: UniqueIndex<Entity>,
    pub indexes: HashMap<String, NonUniqueIndex<Entity>>,
    pub queries: HashMap<String, CachedQuery>,
    /// Back-references other collections have registered onto this one during
    /// wiring (spec.md §4.4).
    pub back_refs: HashMap<String, BackRefInfo>,
    /// Names of collections that declared `parent` pointing at this one
    /// (spec.md §4.4, "Parent-child").
    pub child_collections: Vec<String>,
}

impl CollectionState {
    pub fn new() -> Self {
        CollectionState {
            index: UniqueIndex::new_frozen(),
            indexes: HashMap::new(),
            queries: HashMap::new(),
            back_refs: HashMap::new(),
            child_collections: Vec::new(),
        }
    }

    /// File `entity` under every secondary index this collection maintains for the
    /// fields it has a value for (invariant 2, spec.md §3).
    pub fn index_entity(&mut self, indexed_fields: &[String], entity: &Entity) {
        for field in indexed_fields {
            if let Some(value) = entity.field(field) {
                let bucket_key = stringify_fk(value);
                self.indexes
                    .entry(field.clone())
                    .or_default()
                    .insert(bucket_key, entity.clone());
            }
        }
    }

    pub fn unindex_entity(&mut self, indexed_fields: &[String], entity: &Entity) {
        for field in indexed_fields {
            if let Some(value) = entity.field(field) {
                let bucket_key = stringify_fk(value);
                if let Some(bucket) = self.indexes.get_mut(field) {
                    bucket.remove(&bucket_key, entity.pk());
                }
            }
        }
    }

    /// Insert `new` into the primary index and every secondary index, then extend
    /// any cached query whose predicate it now satisfies (spec.md §4.3 step 6).
    pub fn insert_indexed(&mut self, indexed_fields: &[String], new: Entity) {
        self.index = self.index.with_added([new.clone()]);
        self.index_entity(indexed_fields, &new);
        for cached in self.queries.values_mut() {
            if cached.where_criteria.matches(&new.to_value()) {
                cached.items = cached.items.with_added([new.clone()]);
            }
        }
    }

    /// Remove `entity` from the primary index and every secondary index, and drop
    /// any cached query whose `items` contained it (spec.md §4.3 "remove").
    pub fn remove_indexed(&mut self, indexed_fields: &[String], entity: &Entity) {
        self.index = self.index.with_removed([entity.pk()]);
        self.unindex_entity(indexed_fields, entity);
        self.queries.retain(|_, cached| !cached.items.has(entity.pk()));
    }

    /// Drop all cached entities, indexes, and query-cache entries, without firing
    /// `removed` events (spec.md §9, "bulk reset, not per-item removal").
    pub fn clear(&mut self) {
        self.index = UniqueIndex::new_frozen();
        self.indexes.clear();
        self.queries.clear();
    }

    pub fn get(&self, pk: &Key) -> Option<&Entity> {
        self.index.get(pk)
    }

    pub fn has(&self, pk: &Key) -> bool {
        self.index.has(pk)
    }

    pub fn back_ref_bucket(&self, field: &str) -> Option<&NonUniqueIndex<Entity>> {
        self.indexes.get(field)
    }
}

/// Stringify a JSON value for use as a non-unique-index bucket key, matching the
/// "stringified foreign-key value" rule (spec.md §3, "NonUniqueIndex").
pub fn stringify_fk(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyper_core::KeyPart;
    use serde_json::json;

    fn entity(pk: i64, group: &str) -> Entity {
        let mut fields = serde_json::Map::new();
        fields.insert("pk".into(), json!(pk));
        fields.insert("group_id".into(), json!(group));
        Entity::new(fields, Key::single(KeyPart::Number(pk as f64)), "widgets")
    }

    #[test]
    fn insert_indexed_files_under_secondary_index() {
        let mut state = CollectionState::new();
        let fields = vec!["group_id".to_string()];
        state.insert_indexed(&fields, entity(1, "g1"));
        state.insert_indexed(&fields, entity(2, "g1"));
        let bucket = state.back_ref_bucket("group_id").unwrap();
        assert_eq!(bucket.bucket_len("g1"), 2);
    }

    #[test]
    fn remove_indexed_prunes_bucket_and_invalidates_queries() {
        let mut state = CollectionState::new();
        let fields = vec!["group_id".to_string()];
        let e1 = entity(1, "g1");
        state.insert_indexed(&fields, e1.clone());
        let criteria = Criteria::parse(&json!({"group_id": "g1"})).unwrap();
        state.queries.insert(
            "q".into(),
            CachedQuery {
                where_raw: json!({"group_id": "g1"}),
                where_criteria: criteria,
                items: UniqueIndex::from_items_frozen([e1.clone()]),
            },
        );
        state.remove_indexed(&fields, &e1);
        assert!(state.back_ref_bucket("group_id").unwrap().bucket("g1").is_none());
        assert!(state.queries.is_empty());
    }
}
