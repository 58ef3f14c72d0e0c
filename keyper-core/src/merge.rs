use serde_json::{Map, Value};

/// Deep-assign `source` over `target`, recursing into nested objects and replacing
/// (not merging) arrays and scalars. This is the "clone incoming data over a fresh
/// object" step used to build cache entities and mutable clones (spec.md §4.3, §4.4).
pub fn deep_assign(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_assign(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Structural (deep) equality between two arbitrary JSON values. `serde_json::Value`
/// already implements `PartialEq` structurally for objects/arrays/scalars, but this
/// wrapper exists so call sites read as an explicit domain operation (and so object
/// key order never matters, which `Value`'s `Map` — a `BTreeMap` by default — already
/// guarantees).
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    a == b
}
