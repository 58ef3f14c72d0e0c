use serde_json::{Map, Value};

/// Resolve a dot-separated field path against an arbitrary JSON value.
///
/// Traversal through a missing field or through a non-object value yields `None`
/// rather than erroring — this is the "traversal through a missing/null yields
/// undefined" rule from the query spec, shared by both `Entity::get_path` and the
/// `Criteria` evaluator so the two stay in lockstep.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Same as [`get_path`] but rooted at an attribute map instead of a `Value`, avoiding
/// an allocation to wrap the map in `Value::Object` just to traverse it.
pub fn get_path_in_map<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_path() {
        let v = json!({"a": {"b": {"c": 1}}});
        assert_eq!(get_path(&v, "a.b.c"), Some(&json!(1)));
    }

    #[test]
    fn missing_segment_is_none() {
        let v = json!({"a": {"b": 1}});
        assert_eq!(get_path(&v, "a.x.y"), None);
    }

    #[test]
    fn traversal_through_scalar_is_none() {
        let v = json!({"a": 1});
        assert_eq!(get_path(&v, "a.b"), None);
    }

    #[test]
    fn get_path_in_map_matches_get_path_via_object_wrapper() {
        let v = json!({"a": {"b": 2}});
        let map = v.as_object().unwrap();
        assert_eq!(get_path_in_map(map, "a.b"), get_path(&v, "a.b"));
    }
}
