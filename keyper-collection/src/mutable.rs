use keyper_core::Key;
use keyper_datasource::RawEntity;
use serde_json::Value;

use crate::config::RelationMask;

/// A mutable clone of a cached entity, produced by [`crate::Collection::get_mutable`].
///
/// Cached entities are immutable (`Entity` exposes no mutation); a `MutableEntity` is
/// the Rust stand-in for the spec's "mutable clone inheriting the item prototype"
/// (spec.md §4.3) — an owned, freely-editable copy the caller mutates and later
/// diffs or sends back via `Collection::update(.., inplace: true)`.
#[derive(Debug, Clone)]
pub struct MutableEntity {
    pub(crate) fields: RawEntity,
    pub(crate) pk: Key,
    pub(crate) collection: String,
    /// Mutable clones of back-referenced entities requested via the relation mask
    /// passed to `get_mutable`, keyed by back-reference field name. Recurses per the
    /// nested mask (spec.md §4.3, "recursing with the nested mask").
    pub(crate) back_refs: std::collections::HashMap<String, Vec<MutableEntity>>,
    /// The mask this clone was produced with, retained so `update(.., inplace)` can
    /// preserve it on the replacement clone (spec.md §4.5).
    pub(crate) mask: RelationMask,
}

impl MutableEntity {
    pub fn pk(&self) -> &Key {
        &self.pk
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn fields(&self) -> &RawEntity {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut RawEntity {
        &mut self.fields
    }

    pub fn back_ref(&self, name: &str) -> &[MutableEntity] {
        self.back_refs.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn back_ref_mut(&mut self, name: &str) -> &mut Vec<MutableEntity> {
        self.back_refs.entry(name.to_string()).or_default()
    }

    pub fn relations_mask(&self) -> &RelationMask {
        &self.mask
    }

    /// Payload suitable for sending to a Data Source: own fields plus the pk.
    pub fn to_payload(&self) -> RawEntity {
        self.fields.clone()
    }
}
