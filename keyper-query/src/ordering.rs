use std::cmp::Ordering as CmpOrdering;

use keyper_core::get_path;
use serde_json::Value;

use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq)]
struct SortKey {
    path: String,
    ascending: bool,
}

/// A compiled multi-key sort comparator over dotted field paths.
///
/// Built once from a spec (`"field"`, `"field+"`, `"field-"`, or a sequence of
/// those) and reused across every comparison, per the Design Notes' guidance to
/// build the comparator rather than re-parsing the spec on each call.
#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    keys: Vec<SortKey>,
}

impl Ordering {
    /// Parse a sort spec: a bare field path, or an array of them.
    pub fn parse(spec: &Value) -> Result<Self, QueryError> {
        let keys = match spec {
            Value::String(s) => vec![Self::parse_entry(s)?],
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .ok_or_else(|| QueryError::BadSortSpec(v.to_string()))
                        .and_then(Self::parse_entry)
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(QueryError::BadSortSpec(other.to_string())),
        };
        Ok(Ordering { keys })
    }

    fn parse_entry(raw: &str) -> Result<SortKey, QueryError> {
        if let Some(path) = raw.strip_suffix('-') {
            Ok(SortKey {
                path: path.to_string(),
                ascending: false,
            })
        } else if let Some(path) = raw.strip_suffix('+') {
            Ok(SortKey {
                path: path.to_string(),
                ascending: true,
            })
        } else {
            Ok(SortKey {
                path: raw.to_string(),
                ascending: true,
            })
        }
    }

    /// Compare two documents by this ordering's keys in sequence, short-circuiting
    /// on the first key that doesn't compare equal.
    pub fn compare(&self, a: &Value, b: &Value) -> CmpOrdering {
        for key in &self.keys {
            let av = get_path(a, &key.path);
            let bv = get_path(b, &key.path);
            let ord = compare_values(av, bv);
            if ord != CmpOrdering::Equal {
                return if key.ascending { ord } else { ord.reverse() };
            }
        }
        CmpOrdering::Equal
    }

    /// Sort a slice in place using this ordering.
    pub fn sort_by<T>(&self, items: &mut [T], to_value: impl Fn(&T) -> Value) {
        items.sort_by(|a, b| self.compare(&to_value(a), &to_value(b)));
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(Value::String(a)), Some(Value::String(b))) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&b.as_f64().unwrap_or(f64::NAN))
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descending_sorts_highest_first() {
        let ordering = Ordering::parse(&json!("a-")).unwrap();
        let mut items = vec![json!({"a": 2}), json!({"a": 3}), json!({"a": 1})];
        ordering.sort_by(&mut items, |v| v.clone());
        assert_eq!(items, vec![json!({"a": 3}), json!({"a": 2}), json!({"a": 1})]);
    }

    #[test]
    fn ascending_is_default_and_is_negation_of_descending() {
        let asc = Ordering::parse(&json!("a")).unwrap();
        let desc = Ordering::parse(&json!("a-")).unwrap();
        let x = json!({"a": 1});
        let y = json!({"a": 2});
        assert_eq!(asc.compare(&x, &y), desc.compare(&x, &y).reverse());
    }

    #[test]
    fn compound_ordering_short_circuits_on_first_difference() {
        let ordering = Ordering::parse(&json!(["a", "b-"])).unwrap();
        let mut items = vec![
            json!({"a": 1, "b": 1}),
            json!({"a": 1, "b": 2}),
            json!({"a": 0, "b": 5}),
        ];
        ordering.sort_by(&mut items, |v| v.clone());
        assert_eq!(
            items,
            vec![json!({"a": 0, "b": 5}), json!({"a": 1, "b": 2}), json!({"a": 1, "b": 1})]
        );
    }

    #[test]
    fn string_comparison_is_case_insensitive() {
        let ordering = Ordering::parse(&json!("name")).unwrap();
        assert_eq!(
            ordering.compare(&json!({"name": "Banana"}), &json!({"name": "apple"})),
            CmpOrdering::Greater
        );
    }
}
