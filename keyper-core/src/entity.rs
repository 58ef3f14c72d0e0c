use std::sync::Arc;

use serde_json::{Map, Value};

use crate::key::Key;
use crate::path::get_path_in_map;

/// An immutable, reference-counted entity snapshot.
///
/// Entities are produced only by a collection's `insert`; callers never construct one
/// directly. Cloning an `Entity` is an `Arc` clone, so two snapshots compare equal by
/// pointer (`Entity::is_same`) exactly when they are the same cached object — the Rust
/// stand-in for the spec's "identity stability" invariant, which in a garbage-collected
/// language is phrased as "return the same reference".
#[derive(Debug, Clone)]
pub struct Entity(Arc<EntityInner>);

#[derive(Debug)]
struct EntityInner {
    fields: Map<String, Value>,
    pk: Key,
    collection: String,
}

impl Entity {
    /// Construct a frozen entity. Only `Collection::insert` should call this.
    pub fn new(fields: Map<String, Value>, pk: Key, collection: impl Into<String>) -> Self {
        Entity(Arc::new(EntityInner {
            fields,
            pk,
            collection: collection.into(),
        }))
    }

    pub fn pk(&self) -> &Key {
        &self.0.pk
    }

    pub fn collection_name(&self) -> &str {
        &self.0.collection
    }

    /// Raw own-property access; does not resolve relation accessors.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.fields.get(name)
    }

    /// Dotted-path field access, e.g. `"address.city"`. Missing intermediate
    /// segments resolve to `None` rather than erroring.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        get_path_in_map(&self.0.fields, path)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0.fields
    }

    /// A `serde_json::Value` view of this entity's attribute map, for feeding to the
    /// query engine which operates on plain JSON values.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.fields.clone())
    }

    /// Two entities are the same cached object, not merely structurally equal.
    pub fn is_same(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Structural equality of the attribute maps (ignores identity; two freshly
    /// inserted snapshots with the same fields are structurally equal even though
    /// they are distinct `Arc`s).
    pub fn structurally_eq(&self, other: &Entity) -> bool {
        self.0.fields == other.0.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPart;

    fn entity(json: serde_json::Value) -> Entity {
        let fields = json.as_object().unwrap().clone();
        Entity::new(fields, Key::single(KeyPart::Number(1.0)), "widgets")
    }

    #[test]
    fn dotted_path_resolves_nested_fields() {
        let e = entity(serde_json::json!({"a": {"b": 42}}));
        assert_eq!(e.get_path("a.b"), Some(&serde_json::json!(42)));
    }

    #[test]
    fn dotted_path_through_missing_segment_is_none() {
        let e = entity(serde_json::json!({"a": {"b": 42}}));
        assert_eq!(e.get_path("a.c.d"), None);
    }

    #[test]
    fn clones_share_identity() {
        let e = entity(serde_json::json!({"a": 1}));
        let clone = e.clone();
        assert!(e.is_same(&clone));
    }

    #[test]
    fn structurally_equal_snapshots_need_not_share_identity() {
        let a = entity(serde_json::json!({"a": 1}));
        let b = entity(serde_json::json!({"a": 1}));
        assert!(a.structurally_eq(&b));
        assert!(!a.is_same(&b));
    }
}
