use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use keyper_core::{Entity, Key};
use keyper_index::UniqueIndex;
use serde_json::Value;

use crate::collection::{key_from_scalar, Collection};
use crate::config::{RelationConfig, RelationMask};
use crate::error::CollectionError;
use crate::options::FetchAllOptions;

/// The result of resolving a relation field on a cached entity: one related
/// entity for a to-one relation (`None` if the foreign key is unset or its
/// target isn't cached), or every cached member for a to-many relation
/// (spec.md §4.4, "Relation accessors").
#[derive(Debug, Clone)]
pub enum RelatedValue {
    One(Option<Entity>),
    Many(Vec<Entity>),
}

impl Collection {
    /// Resolve `field` on `entity` against the cache only — no I/O, matching the
    /// spec's description of relation accessors as thin wrappers over
    /// `relatedCollection.get(fk)` (spec.md §4.4). Use `load_relations` first if
    /// the related entities might not be cached yet.
    pub fn relation(&self, entity: &Entity, field: &str) -> Result<RelatedValue, CollectionError> {
        let relation = self
            .config()
            .relations
            .get(field)
            .ok_or_else(|| CollectionError::UnknownRelationTarget {
                field: field.to_string(),
                collection: self.name().to_string(),
            })?
            .clone();
        let target = self
            .resolve_relation_target(field, &relation)
            .map_err(|source| CollectionError::RelationResolution {
                field: field.to_string(),
                source: Box::new(source),
            })?;
        let fk_field = relation.foreign_key_field(field);

        if relation.many {
            let mut out = Vec::new();
            if let Some(Value::Array(items)) = entity.field(&fk_field) {
                for item in items {
                    if let Some(key) = key_from_scalar(item) {
                        if let Some(related) = target.peek(&key) {
                            out.push(related);
                        }
                    }
                }
            }
            Ok(RelatedValue::Many(out))
        } else {
            let related = entity
                .field(&fk_field)
                .and_then(key_from_scalar)
                .and_then(|key| target.peek(&key));
            Ok(RelatedValue::One(related))
        }
    }

    /// Look up a relation's target collection through the registry, the part of
    /// resolving a relation accessor that can actually fail "not found"
    /// (unbound registry, missing target) — isolated so `relation` can wrap just
    /// this failure with the field path (spec.md §4.4, "re-thrown wrapped with
    /// the field path").
    fn resolve_relation_target(&self, field: &str, relation: &RelationConfig) -> Result<Arc<Collection>, CollectionError> {
        let registry = self.registry()?;
        registry
            .collection(&relation.collection)
            .ok_or_else(|| CollectionError::UnknownRelationTarget {
                field: field.to_string(),
                collection: relation.collection.clone(),
            })
    }

    /// Every entity in the declaring collection whose foreign key points at
    /// `entity`, read from that collection's secondary index (spec.md §4.4,
    /// "Back-references"). Cache-only, like `relation`.
    pub fn back_ref(&self, entity: &Entity, name: &str) -> Result<UniqueIndex<Entity>, CollectionError> {
        let info = {
            let state = self.read_state();
            state
                .back_refs
                .get(name)
                .cloned()
                .ok_or_else(|| CollectionError::UnknownRelationTarget {
                    field: name.to_string(),
                    collection: self.name().to_string(),
                })?
        };
        let registry = self.registry()?;
        let source = registry
            .collection(&info.source_collection)
            .ok_or_else(|| CollectionError::UnknownRelationTarget {
                field: name.to_string(),
                collection: info.source_collection.clone(),
            })?;
        Ok(source.non_unique_bucket(&info.foreign_key_field, entity.pk()))
    }

    /// Hydrate forward relations named in `mask` across `items`: batch-fetch
    /// whatever isn't already cached (one `fetch_all` per distinct related
    /// collection, not one request per entity), then recurse into nested masks
    /// (spec.md §4.6, "Relation hydration"). Back-reference fields in a mask are
    /// skipped — hydrating the reverse direction means re-querying the declaring
    /// collection's secondary index, which is already O(1) from the cache and has
    /// no natural batch-load shape, so it is left to `back_ref`/`get_mutable`.
    pub async fn load_relations(self: &Arc<Self>, items: &[Entity], mask: &RelationMask) -> Result<(), CollectionError> {
        if items.is_empty() || mask.is_empty() {
            return Ok(());
        }
        let registry = self.registry()?;

        struct FieldLoad {
            field: String,
            target: Arc<Collection>,
            relation: RelationConfig,
        }
        let mut loads = Vec::new();
        let mut per_collection: HashMap<String, (Arc<Collection>, HashSet<Key>)> = HashMap::new();

        for field in mask.fields() {
            let Some(relation) = self.config().relations.get(field).cloned() else {
                continue;
            };
            let target = registry
                .collection(&relation.collection)
                .ok_or_else(|| CollectionError::UnknownRelationTarget {
                    field: field.clone(),
                    collection: relation.collection.clone(),
                })?;
            let fk_field = relation.foreign_key_field(field);
            let entry = per_collection
                .entry(relation.collection.clone())
                .or_insert_with(|| (target.clone(), HashSet::new()));
            for item in items {
                collect_fk_keys(item, &fk_field, relation.many, |key| {
                    if !target.peek_exists(&key) {
                        entry.1.insert(key);
                    }
                });
            }
            loads.push(FieldLoad {
                field: field.clone(),
                target,
                relation,
            });
        }

        for (_, (target, pks)) in per_collection {
            if !pks.is_empty() {
                let pks: Vec<Key> = pks.into_iter().collect();
                target.fetch_all(&pks, FetchAllOptions::default()).await?;
            }
        }

        for load in loads {
            let Some(nested_mask) = mask.nested(&load.field) else { continue };
            if nested_mask.is_empty() {
                continue;
            }
            let fk_field = load.relation.foreign_key_field(&load.field);
            let mut related = Vec::new();
            for item in items {
                collect_fk_keys(item, &fk_field, load.relation.many, |key| {
                    if let Some(entity) = load.target.peek(&key) {
                        related.push(entity);
                    }
                });
            }
            if !related.is_empty() {
                load.target.load_relations(&related, nested_mask).await?;
            }
        }
        Ok(())
    }

    pub(crate) fn peek_exists(&self, pk: &Key) -> bool {
        self.read_state().has(pk)
    }

    pub(crate) fn merge_mask(&self, mask: Option<RelationMask>) -> RelationMask {
        let default_mask = self.config().default_mask();
        match mask {
            Some(m) => default_mask.merge(&m),
            None => default_mask,
        }
    }
}

fn collect_fk_keys(item: &Entity, fk_field: &str, many: bool, mut sink: impl FnMut(Key)) {
    match item.field(fk_field) {
        Some(Value::Array(items)) if many => {
            for value in items {
                if let Some(key) = key_from_scalar(value) {
                    sink(key);
                }
            }
        }
        Some(value) => {
            if let Some(key) = key_from_scalar(value) {
                sink(key);
            }
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use async_trait::async_trait;
    use keyper_core::SliceArray;
    use keyper_datasource::{DataSource, RawEntity, SourceError};
    use serde_json::json;

    struct NoopSource;
    #[async_trait]
    impl DataSource for NoopSource {
        async fn find_one(&self, _pk: &Key, _o: &Value) -> Result<RawEntity, SourceError> {
            Err(SourceError::NotFound)
        }
        async fn find(&self, _p: &keyper_datasource::FetchParams, _o: &Value) -> Result<SliceArray<RawEntity>, SourceError> {
            Ok(SliceArray::new(vec![]))
        }
        async fn find_all(&self, _p: &[Key], _o: &Value) -> Result<Vec<RawEntity>, SourceError> {
            Ok(vec![])
        }
        async fn create(&self, p: &RawEntity, _o: &Value) -> Result<RawEntity, SourceError> {
            Ok(p.clone())
        }
        async fn update(&self, _pk: &Key, p: &RawEntity, _o: &Value) -> Result<RawEntity, SourceError> {
            Ok(p.clone())
        }
        async fn delete(&self, _pk: &Key, _o: &Value) -> Result<(), SourceError> {
            Ok(())
        }
    }

    #[test]
    fn unbound_relation_accessor_is_wrapped_with_field_path() {
        let widgets = Collection::new(
            "widgets",
            CollectionConfig::new("id").with_relation("owner", RelationConfig::to_one("users")),
            Arc::new(NoopSource),
        );
        let widget = widgets.insert(json!({"id": 1, "owner_pk": "u1"}).as_object().unwrap().clone()).unwrap();

        // Never bound to a registry, so resolving "owner" must fail with the
        // registry error wrapped in the field path that triggered it.
        let err = widgets.relation(&widget, "owner").unwrap_err();
        match err {
            CollectionError::RelationResolution { field, source } => {
                assert_eq!(field, "owner");
                assert!(matches!(*source, CollectionError::Unbound(_)));
            }
            other => panic!("expected RelationResolution, got {other:?}"),
        }
    }

    #[test]
    fn unknown_relation_field_is_reported_directly() {
        let widgets = Collection::new("widgets", CollectionConfig::new("id"), Arc::new(NoopSource));
        let widget = widgets.insert(json!({"id": 1}).as_object().unwrap().clone()).unwrap();
        let err = widgets.relation(&widget, "owner").unwrap_err();
        assert!(matches!(err, CollectionError::UnknownRelationTarget { .. }));
    }
}
