use std::collections::HashSet;
use std::sync::{Arc, OnceLock, Weak};

use keyper_core::{Entity, Key, KeyPart};
use keyper_datasource::{DataSource, RawEntity};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::cache::{BackRefInfo, CollectionState};
use crate::config::{CollectionConfig, RelationMask};
use crate::error::CollectionError;
use crate::mutable::MutableEntity;
use crate::pending::PendingMap;
use crate::registry::CollectionRegistry;

/// Fired on `Collection::inserted()` whenever an entity is cached for the first
/// time or replaces a structurally-different previous snapshot (spec.md §5).
#[derive(Debug, Clone)]
pub struct InsertedEvent {
    pub entity: Entity,
    pub previous: Option<Entity>,
}

/// The in-memory cache, relation graph, and Data Source boundary for one entity
/// type (spec.md §4, "Collection" — the largest single component of the system).
///
/// A `Collection` never talks to another collection by holding a direct reference
/// to it: relation hydration, back-reference reads, and parent/child wiring all go
/// through [`CollectionRegistry`], bound once after construction by whatever owns
/// the whole graph (`keyper_db::Db`). Until `bind_registry` is called, any
/// operation that needs to reach a sibling collection fails with
/// [`CollectionError::UnknownRelationTarget`].
pub struct Collection {
    name: String,
    config: CollectionConfig,
    pub(crate) source: Arc<dyn DataSource>,
    /// Foreign-key fields that need a `NonUniqueIndex` maintained on this
    /// collection — derived once at construction from `config.relations`, for
    /// every relation that declares a `back_ref` (spec.md §4.4).
    indexed_fields: Vec<String>,
    registry: OnceLock<Weak<dyn CollectionRegistry>>,
    state: std::sync::RwLock<CollectionState>,
    /// Deduplicates concurrent `fetch_one`/`fetch_all` loads by pk fingerprint.
    /// The future's own output carries nothing useful (the cache is the source of
    /// truth once it settles) so `T = ()`.
    pub(crate) pending_items: Arc<PendingMap<(), CollectionError>>,
    /// Deduplicates concurrent `fetch` calls by stringified `FetchParams`. Unlike
    /// `pending_items`, the slice itself is the value a non-cacheable (paged) query
    /// needs back, so `T` carries it.
    pub(crate) pending_queries: Arc<PendingMap<keyper_core::SliceArray<Entity>, CollectionError>>,
    inserted: broadcast::Sender<InsertedEvent>,
    removed: broadcast::Sender<Entity>,
}

impl Collection {
    pub fn new(name: impl Into<String>, config: CollectionConfig, source: Arc<dyn DataSource>) -> Arc<Self> {
        let indexed_fields = config
            .relations
            .iter()
            .filter(|(_, relation)| relation.back_ref.is_some())
            .map(|(field, relation)| relation.foreign_key_field(field))
            .collect();
        let (inserted_tx, _) = broadcast::channel(1024);
        let (removed_tx, _) = broadcast::channel(1024);
        Arc::new(Collection {
            name: name.into(),
            config,
            source,
            indexed_fields,
            registry: OnceLock::new(),
            state: std::sync::RwLock::new(CollectionState::new()),
            pending_items: Arc::new(PendingMap::new()),
            pending_queries: Arc::new(PendingMap::new()),
            inserted: inserted_tx,
            removed: removed_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Bind the registry used to look up sibling collections. Called exactly once,
    /// by `Db::create_collection`, after the collection is constructed but before
    /// it is handed to callers.
    pub fn bind_registry(&self, registry: Weak<dyn CollectionRegistry>) {
        let _ = self.registry.set(registry);
    }

    pub(crate) fn registry(&self) -> Result<Arc<dyn CollectionRegistry>, CollectionError> {
        self.registry
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| CollectionError::Unbound(self.name.clone()))
    }

    /// Register a back-reference onto this collection: `name` becomes a field
    /// through which callers can reach every entity in `source_collection` whose
    /// `foreign_key_field` equals this entity's pk (spec.md §4.4). Called once per
    /// relation during `Db::create_collection` wiring.
    pub fn register_back_ref(&self, name: impl Into<String>, info: BackRefInfo) -> Result<(), CollectionError> {
        let name = name.into();
        let mut state = self.state.write().unwrap();
        if state.back_refs.contains_key(&name) {
            return Err(CollectionError::DuplicateRelationName(name));
        }
        state.back_refs.insert(name, info);
        Ok(())
    }

    pub fn add_child_collection(&self, name: impl Into<String>) {
        self.state.write().unwrap().child_collections.push(name.into());
    }

    pub fn child_collections(&self) -> Vec<String> {
        self.state.read().unwrap().child_collections.clone()
    }

    pub fn inserted(&self) -> broadcast::Receiver<InsertedEvent> {
        self.inserted.subscribe()
    }

    pub fn removed(&self) -> broadcast::Receiver<Entity> {
        self.removed.subscribe()
    }

    /// Cache-only lookup; never touches the Data Source.
    pub fn peek(&self, pk: &Key) -> Option<Entity> {
        self.state.read().unwrap().get(pk).cloned()
    }

    /// Cache-only lookup that fails loudly instead of returning `None` — for
    /// callers who consider a cache miss a bug rather than an "I need to load it"
    /// signal (spec.md §4.3, "Lookup").
    pub fn get(&self, pk: &Key) -> Result<Entity, CollectionError> {
        self.peek(pk).ok_or_else(|| CollectionError::NotCached(pk.fingerprint()))
    }

    pub(crate) fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CollectionState> {
        self.state.read().unwrap()
    }

    pub(crate) fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CollectionState> {
        self.state.write().unwrap()
    }

    pub(crate) fn non_unique_bucket(&self, field: &str, pk: &Key) -> keyper_index::UniqueIndex<Entity> {
        self.state
            .read()
            .unwrap()
            .indexes
            .get(field)
            .map(|idx| idx.bucket_or_empty(&pk.fingerprint()))
            .unwrap_or_else(keyper_index::UniqueIndex::new_frozen)
    }

    fn back_refs_snapshot(&self) -> Vec<(String, BackRefInfo)> {
        self.state
            .read()
            .unwrap()
            .back_refs
            .iter()
            .map(|(name, info)| (name.clone(), info.clone()))
            .collect()
    }

    /// Drop every cached entity, index, and query-cache entry. A bulk reset, not a
    /// sequence of per-item removals — no `removed` events fire (spec.md §9).
    pub fn clear(&self) {
        self.state.write().unwrap().clear();
    }

    /// File a raw attribute map into the cache, cascading embedded relations and
    /// reconciling embedded back-reference arrays along the way (spec.md §4.3,
    /// "insert").
    ///
    /// Synchronous: nothing here touches the Data Source. Callers that just
    /// fetched `raw` from one call `insert` after the `.await`; callers building a
    /// fixture in a test call it directly.
    pub fn insert(&self, raw: RawEntity) -> Result<Entity, CollectionError> {
        let mut payload = raw;
        if let Some(transform) = &self.config.before_insert {
            payload = transform(payload);
        }

        let pk = self.config.primary_key.extract(&payload)?;
        let registry = self.registry.get().and_then(Weak::upgrade);

        // Embedded forward relations: a nested object under a relation field is
        // inserted into its own collection first, then collapsed to a foreign key
        // on this payload (spec.md §4.4, "Embedded relation payloads").
        for (field, relation) in &self.config.relations {
            let embedded = match payload.get(field) {
                Some(Value::Object(_)) => true,
                _ => false,
            };
            if !embedded {
                continue;
            }
            let Value::Object(nested) = payload.remove(field).unwrap() else {
                unreachable!()
            };
            if let Some(registry) = &registry {
                if let Some(target) = registry.collection(&relation.collection) {
                    let nested_entity = target.insert(nested)?;
                    let fk_field = relation.foreign_key_field(field);
                    payload.insert(fk_field, key_to_value(nested_entity.pk()));
                }
            }
        }

        // Embedded back-reference arrays: a plain array of nested objects under a
        // back-ref slot is reconciled against the declaring collection's current
        // membership for this pk, inserting/updating each element and
        // cascade-removing whatever dropped out (spec.md §4.4, "Cascading removal").
        for (name, info) in self.back_refs_snapshot() {
            let is_array = matches!(payload.get(&name), Some(Value::Array(_)));
            if !is_array {
                continue;
            }
            let Some(Value::Array(items)) = payload.remove(&name) else {
                unreachable!()
            };
            if let Some(registry) = &registry {
                if let Some(source_collection) = registry.collection(&info.source_collection) {
                    let mut kept = HashSet::new();
                    for item in items {
                        if let Value::Object(obj) = item {
                            let inserted = source_collection.insert(obj)?;
                            kept.insert(inserted.pk().clone());
                        }
                    }
                    let previous_bucket = source_collection.non_unique_bucket(&info.foreign_key_field, &pk);
                    let stale: Vec<Entity> = previous_bucket
                        .iter()
                        .filter(|entity| !kept.contains(entity.pk()))
                        .cloned()
                        .collect();
                    for entity in &stale {
                        tracing::debug!(
                            collection = %source_collection.name,
                            pk = %entity.pk(),
                            "cascade-removing back-reference member dropped from embedded payload"
                        );
                        source_collection.remove(entity, true);
                    }
                }
            }
        }

        let entity = Entity::new(payload, pk.clone(), self.name.clone());

        let mut state = self.state.write().unwrap();
        if let Some(previous) = state.get(&pk) {
            if previous.structurally_eq(&entity) {
                // Identity-stable: an unchanged re-insert returns the existing
                // cached object rather than minting a new one (spec.md §4.3).
                return Ok(previous.clone());
            }
        }
        let previous = state.get(&pk).cloned();
        if let Some(previous) = &previous {
            state.remove_indexed(&self.indexed_fields, previous);
        }
        state.insert_indexed(&self.indexed_fields, entity.clone());
        drop(state);

        let _ = self.inserted.send(InsertedEvent {
            entity: entity.clone(),
            previous,
        });
        Ok(entity)
    }

    /// Drop `entity` from the cache. `notify = false` is used for bulk/cascading
    /// removals the caller doesn't want surfaced as individual events.
    pub fn remove(&self, entity: &Entity, notify: bool) {
        let mut state = self.state.write().unwrap();
        if !state.has(entity.pk()) {
            return;
        }
        state.remove_indexed(&self.indexed_fields, entity);
        drop(state);
        if notify {
            let _ = self.removed.send(entity.clone());
        }
    }

    /// A fresh, independently-editable clone of a cached entity, with back-
    /// reference members recursively cloned per `mask` (spec.md §4.3,
    /// "get_mutable").
    pub fn get_mutable(&self, pk: &Key, mask: Option<&RelationMask>) -> Result<MutableEntity, CollectionError> {
        let entity = self.peek(pk).ok_or_else(|| CollectionError::NotCached(pk.fingerprint()))?;
        self.build_mutable(&entity, mask)
    }

    pub(crate) fn build_mutable(
        &self,
        entity: &Entity,
        mask: Option<&RelationMask>,
    ) -> Result<MutableEntity, CollectionError> {
        let mask = mask.cloned().unwrap_or_default();
        let mut back_refs = std::collections::HashMap::new();
        if !mask.is_empty() {
            let registry = self.registry()?;
            let back_refs_snapshot = self.back_refs_snapshot();
            for (name, info) in &back_refs_snapshot {
                let nested = match mask.nested(name) {
                    Some(nested) => nested,
                    None => continue,
                };
                let source = registry
                    .collection(&info.source_collection)
                    .ok_or_else(|| CollectionError::UnknownRelationTarget {
                        field: name.clone(),
                        collection: info.source_collection.clone(),
                    })?;
                let bucket = source.non_unique_bucket(&info.foreign_key_field, entity.pk());
                let mut clones = Vec::with_capacity(bucket.len());
                for member in bucket.iter() {
                    clones.push(source.build_mutable(member, Some(nested))?);
                }
                back_refs.insert(name.clone(), clones);
            }
        }
        Ok(MutableEntity {
            fields: entity.fields().clone(),
            pk: entity.pk().clone(),
            collection: self.name.clone(),
            back_refs,
            mask,
        })
    }

    pub fn has_changes(&self, mutable: &MutableEntity) -> Result<bool, CollectionError> {
        Ok(self.get_diff(mutable)?.is_some())
    }

    /// The subset of `mutable`'s own fields and back-reference members that differ
    /// from the currently cached entity, stamped with the source pk so the result
    /// is addressable on its own (spec.md §4.3, "get_diff"). `None` when nothing
    /// changed.
    pub fn get_diff(&self, mutable: &MutableEntity) -> Result<Option<RawEntity>, CollectionError> {
        let current = self
            .peek(&mutable.pk)
            .ok_or_else(|| CollectionError::ForeignMutable(mutable.pk.fingerprint()))?;

        let mut diff = RawEntity::new();
        for (key, value) in &mutable.fields {
            if current.field(key) != Some(value) {
                diff.insert(key.clone(), value.clone());
            }
        }

        if !mutable.back_refs.is_empty() {
            let registry = self.registry().ok();
            let back_refs_snapshot = self.back_refs_snapshot();
            for (name, members) in &mutable.back_refs {
                let info = match back_refs_snapshot.iter().find(|(n, _)| n == name) {
                    Some((_, info)) => info.clone(),
                    None => continue,
                };
                let Some(registry) = &registry else { continue };
                let Some(source) = registry.collection(&info.source_collection) else {
                    continue;
                };
                let current_bucket = source.non_unique_bucket(&info.foreign_key_field, &mutable.pk);
                let mut any_changed = members.len() != current_bucket.len();
                let mut member_diffs = Vec::new();
                for member in members {
                    if !current_bucket.has(&member.pk) {
                        any_changed = true;
                        member_diffs.push(Value::Object(member.to_payload()));
                        continue;
                    }
                    if let Some(nested_diff) = source.get_diff(member)? {
                        any_changed = true;
                        member_diffs.push(Value::Object(nested_diff));
                    }
                }
                if any_changed {
                    diff.insert(name.clone(), Value::Array(member_diffs));
                }
            }
        }

        if diff.is_empty() {
            return Ok(None);
        }
        for field in self.config.primary_key.fields() {
            if let Some(value) = current.field(field) {
                diff.insert(field.clone(), value.clone());
            }
        }
        Ok(Some(diff))
    }
}

pub(crate) fn key_to_value(key: &Key) -> Value {
    match key {
        Key::Single(part) => keypart_to_value(part),
        Key::Compound(parts) => Value::Array(parts.iter().map(keypart_to_value).collect()),
    }
}

fn keypart_to_value(part: &KeyPart) -> Value {
    match part {
        KeyPart::String(s) => Value::String(s.clone()),
        KeyPart::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
    }
}

pub(crate) fn key_from_scalar(value: &Value) -> Option<Key> {
    KeyPart::from_value(value).ok().map(Key::Single)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keyper_core::SliceArray;
    use keyper_datasource::SourceError;
    use serde_json::json;

    struct NoopSource;

    #[async_trait]
    impl DataSource for NoopSource {
        async fn find_one(&self, _pk: &Key, _opts: &Value) -> Result<RawEntity, SourceError> {
            Err(SourceError::NotFound)
        }
        async fn find(&self, _params: &keyper_datasource::FetchParams, _opts: &Value) -> Result<SliceArray<RawEntity>, SourceError> {
            Ok(SliceArray::new(vec![]))
        }
        async fn find_all(&self, _pks: &[Key], _opts: &Value) -> Result<Vec<RawEntity>, SourceError> {
            Ok(vec![])
        }
        async fn create(&self, payload: &RawEntity, _opts: &Value) -> Result<RawEntity, SourceError> {
            Ok(payload.clone())
        }
        async fn update(&self, _pk: &Key, payload: &RawEntity, _opts: &Value) -> Result<RawEntity, SourceError> {
            Ok(payload.clone())
        }
        async fn delete(&self, _pk: &Key, _opts: &Value) -> Result<(), SourceError> {
            Ok(())
        }
    }

    fn collection() -> Arc<Collection> {
        Collection::new("widgets", CollectionConfig::new("id"), Arc::new(NoopSource))
    }

    #[test]
    fn insert_is_identity_stable_for_unchanged_reinsert() {
        let c = collection();
        let a = c.insert(json!({"id": 1, "name": "a"}).as_object().unwrap().clone()).unwrap();
        let b = c.insert(json!({"id": 1, "name": "a"}).as_object().unwrap().clone()).unwrap();
        assert!(a.is_same(&b));
    }

    #[test]
    fn insert_replaces_on_structural_change() {
        let c = collection();
        let a = c.insert(json!({"id": 1, "name": "a"}).as_object().unwrap().clone()).unwrap();
        let b = c.insert(json!({"id": 1, "name": "b"}).as_object().unwrap().clone()).unwrap();
        assert!(!a.is_same(&b));
        assert_eq!(c.peek(b.pk()).unwrap().field("name").unwrap(), "b");
    }

    #[test]
    fn remove_drops_from_cache() {
        let c = collection();
        let a = c.insert(json!({"id": 1}).as_object().unwrap().clone()).unwrap();
        c.remove(&a, false);
        assert!(c.peek(a.pk()).is_none());
    }

    #[test]
    fn get_diff_is_none_for_unchanged_mutable() {
        let c = collection();
        c.insert(json!({"id": 1, "name": "a"}).as_object().unwrap().clone()).unwrap();
        let pk = Key::single(KeyPart::Number(1.0));
        let mutable = c.get_mutable(&pk, None).unwrap();
        assert!(c.get_diff(&mutable).unwrap().is_none());
    }

    #[test]
    fn get_diff_surfaces_changed_own_fields_stamped_with_pk() {
        let c = collection();
        c.insert(json!({"id": 1, "name": "a"}).as_object().unwrap().clone()).unwrap();
        let pk = Key::single(KeyPart::Number(1.0));
        let mut mutable = c.get_mutable(&pk, None).unwrap();
        mutable.set_field("name", json!("b"));
        let diff = c.get_diff(&mutable).unwrap().unwrap();
        assert_eq!(diff.get("name").unwrap(), "b");
        assert_eq!(diff.get("id").unwrap(), 1);
    }
}
