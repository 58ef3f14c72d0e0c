use serde_json::Value;

/// Canonical string fingerprint of a JSON value, with object keys sorted
/// recursively so that two values differing only in key order produce the same
/// fingerprint.
///
/// Used for both the pending-request key and the query-cache key, so two
/// differently-ordered but equivalent fetch `params` coalesce onto the same
/// in-flight request / cache entry (spec.md §4.5, §9).
pub fn stable_key(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap());
                out.push(':');
                write_stable(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let a = json!({"where": {"a": 1, "b": 2}});
        let b = json!({"where": {"b": 2, "a": 1}});
        assert_eq!(stable_key(&a), stable_key(&b));
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let a = json!({"x": {"z": 1, "y": 2}, "a": 1});
        let b = json!({"a": 1, "x": {"y": 2, "z": 1}});
        assert_eq!(stable_key(&a), stable_key(&b));
    }

    #[test]
    fn differing_values_produce_differing_fingerprints() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(stable_key(&a), stable_key(&b));
    }

    #[test]
    fn array_order_is_preserved() {
        let a = json!({"a": [1, 2]});
        let b = json!({"a": [2, 1]});
        assert_ne!(stable_key(&a), stable_key(&b));
    }
}
