use std::collections::HashMap;
use std::sync::Arc;

use keyper_core::PrimaryKeyFields;
use keyper_datasource::RawEntity;

/// A nested field → relation mask used by relation hydration (spec.md §4.6) and by
/// a collection's eager-load defaults.
///
/// The source spec models a mask entry as `true | {nestedMask}`; here a leaf (no
/// further nesting) is simply an empty `RelationMask`, and a non-leaf carries the
/// mask to recurse into once the related entities are resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationMask(HashMap<String, RelationMask>);

impl RelationMask {
    pub fn new() -> Self {
        RelationMask(HashMap::new())
    }

    pub fn leaf() -> Self {
        RelationMask::new()
    }

    pub fn with(mut self, field: impl Into<String>, nested: RelationMask) -> Self {
        self.0.insert(field.into(), nested);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn nested(&self, field: &str) -> Option<&RelationMask> {
        self.0.get(field)
    }

    /// Union two masks, recursively merging nested masks for fields present in both.
    pub fn merge(&self, other: &RelationMask) -> RelationMask {
        let mut merged = self.clone();
        for (field, nested) in &other.0 {
            merged
                .0
                .entry(field.clone())
                .and_modify(|existing| *existing = existing.merge(nested))
                .or_insert_with(|| nested.clone());
        }
        merged
    }
}

/// A transform applied to raw payloads before they're cached or sent. Plain
/// function pointers would be too restrictive (closures over collection-specific
/// state are common), so this is a boxed `Fn`, matching the teacher's preference for
/// trait-object callback fields over generic type parameters on config structs.
pub type PayloadTransform = Arc<dyn Fn(RawEntity) -> RawEntity + Send + Sync>;

/// Configuration for a single forward relation field (spec.md §4.4).
#[derive(Clone)]
pub struct RelationConfig {
    /// Name of the related collection.
    pub collection: String,
    /// Whether this relation is to-many (`field_pks` foreign key, array) rather than
    /// to-one (`field_pk`, scalar).
    pub many: bool,
    /// Name of the foreign-key field on the declaring entity. If `None`, derived as
    /// `{field}_pk` (single) or `{field}_pks` (many) — only valid when the related
    /// collection has a single-field primary key.
    pub foreign_key: Option<String>,
    /// Name of the back-reference field installed on the *related* collection's
    /// entities, if any.
    pub back_ref: Option<String>,
    /// Whether this relation is loaded by default on every `fetch`/`fetch_one`/
    /// `fetch_all`, merged with any mask the caller passes explicitly.
    pub eager_load: bool,
}

impl RelationConfig {
    pub fn to_one(collection: impl Into<String>) -> Self {
        RelationConfig {
            collection: collection.into(),
            many: false,
            foreign_key: None,
            back_ref: None,
            eager_load: false,
        }
    }

    pub fn to_many(collection: impl Into<String>) -> Self {
        RelationConfig {
            collection: collection.into(),
            many: true,
            foreign_key: None,
            back_ref: None,
            eager_load: false,
        }
    }

    pub fn with_foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }

    pub fn with_back_ref(mut self, name: impl Into<String>) -> Self {
        self.back_ref = Some(name.into());
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager_load = true;
        self
    }

    /// The foreign-key field name, deriving the default from `field` when the
    /// config doesn't supply one.
    pub fn foreign_key_field(&self, field: &str) -> String {
        match &self.foreign_key {
            Some(fk) => fk.clone(),
            None if self.many => format!("{field}_pks"),
            None => format!("{field}_pk"),
        }
    }
}

/// Configuration for a collection: primary key, relation graph, payload transforms,
/// and parent/child wiring (spec.md §6, "Collection configuration").
#[derive(Clone)]
pub struct CollectionConfig {
    pub primary_key: PrimaryKeyFields,
    /// Name of the relation field whose target collection adopts this collection as
    /// a child (spec.md §4.4, "Parent-child").
    pub parent: Option<String>,
    pub relations: HashMap<String, RelationConfig>,
    pub before_insert: Option<PayloadTransform>,
    pub before_send: Option<PayloadTransform>,
    /// Relation fields hydrated by default on every fetch, merged with whatever
    /// mask the caller passes explicitly.
    pub eager_load: RelationMask,
}

impl CollectionConfig {
    pub fn new(primary_key: impl Into<PrimaryKeyFields>) -> Self {
        CollectionConfig {
            primary_key: primary_key.into(),
            parent: None,
            relations: HashMap::new(),
            before_insert: None,
            before_send: None,
            eager_load: RelationMask::new(),
        }
    }

    pub fn with_relation(mut self, field: impl Into<String>, relation: RelationConfig) -> Self {
        self.relations.insert(field.into(), relation);
        self
    }

    pub fn with_parent(mut self, field: impl Into<String>) -> Self {
        self.parent = Some(field.into());
        self
    }

    pub fn with_before_insert(mut self, f: impl Fn(RawEntity) -> RawEntity + Send + Sync + 'static) -> Self {
        self.before_insert = Some(Arc::new(f));
        self
    }

    pub fn with_before_send(mut self, f: impl Fn(RawEntity) -> RawEntity + Send + Sync + 'static) -> Self {
        self.before_send = Some(Arc::new(f));
        self
    }

    pub fn with_eager_load(mut self, mask: RelationMask) -> Self {
        self.eager_load = mask;
        self
    }

    /// The default eager-load mask derived from `relations[*].eager_load = true`,
    /// merged with `self.eager_load`.
    pub fn default_mask(&self) -> RelationMask {
        let mut mask = self.eager_load.clone();
        for (field, relation) in &self.relations {
            if relation.eager_load && mask.nested(field).is_none() {
                mask = mask.with(field.clone(), RelationMask::leaf());
            }
        }
        mask
    }
}
