use keyper_core::get_path;
use serde_json::Value;

use crate::error::QueryError;

/// A parsed, evaluable query predicate.
///
/// `Criteria` is a tagged AST rather than a re-interpreted `serde_json::Value` on
/// every evaluation — parsed once via [`Criteria::parse`], evaluated many times via
/// [`Criteria::matches`]. This mirrors the Design Notes' guidance to model dynamic
/// criteria objects as a tagged sum built by a small parser, with evaluation as a
/// dispatch over tags, rather than re-walking the raw JSON mapping on every test.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    /// All clauses found in one criteria mapping are implicitly AND-ed together,
    /// exactly as MongoDB-style query objects treat multiple sibling keys.
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Nor(Vec<Criteria>),
    Not(Box<Criteria>),
    Field(String, Box<Criteria>),
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Like(LikePattern),
    Any(Box<Criteria>),
    AllOf(Box<Criteria>),
    Length(Box<Criteria>),
}

#[derive(Debug, Clone, PartialEq)]
enum LikePattern {
    Substring(String),
    Prefix(String),
    Suffix(String),
}

impl LikePattern {
    fn parse(pattern: &str) -> Result<Self, QueryError> {
        let leading = pattern.starts_with('%');
        let trailing = pattern.ends_with('%');
        if !leading && !trailing {
            return Err(QueryError::LikeMissingWildcard(pattern.to_string()));
        }
        if pattern == "%" {
            return Ok(LikePattern::Substring(String::new()));
        }
        let inner = match (leading, trailing) {
            (true, true) => &pattern[1..pattern.len() - 1],
            (false, true) => &pattern[..pattern.len() - 1],
            (true, false) => &pattern[1..],
            (false, false) => unreachable!(),
        };
        Ok(if leading && trailing {
            LikePattern::Substring(inner.to_string())
        } else if trailing {
            LikePattern::Prefix(inner.to_string())
        } else {
            LikePattern::Suffix(inner.to_string())
        })
    }

    fn matches(&self, value: Option<&Value>) -> bool {
        let text = match value.and_then(Value::as_str) {
            Some(s) => s,
            None => return false,
        };
        match self {
            LikePattern::Substring(inner) => text.contains(inner.as_str()),
            LikePattern::Prefix(inner) => text.starts_with(inner.as_str()),
            LikePattern::Suffix(inner) => text.ends_with(inner.as_str()),
        }
    }
}

impl Criteria {
    /// An always-true criteria (no clauses), the identity for `filter({})`.
    pub fn any() -> Self {
        Criteria { clauses: vec![] }
    }

    /// Parse a criteria from its MongoDB-style mapping form.
    pub fn parse(value: &Value) -> Result<Self, QueryError> {
        let obj = match value {
            Value::Object(obj) => obj,
            _ => {
                return Err(QueryError::BadOperand {
                    operator: "criteria".into(),
                    expected: "an object",
                    got: value.to_string(),
                })
            }
        };
        let mut clauses = Vec::with_capacity(obj.len());
        for (key, arg) in obj {
            clauses.push(Self::parse_entry(key, arg)?);
        }
        Ok(Criteria { clauses })
    }

    fn parse_entry(key: &str, arg: &Value) -> Result<Clause, QueryError> {
        if let Some(op) = key.strip_prefix('$') {
            Self::parse_operator(op, arg)
        } else {
            let sub = Self::promote(arg)?;
            Ok(Clause::Field(key.to_string(), Box::new(sub)))
        }
    }

    /// A bare (non-object) sub-criteria is promoted to `{$eq: value}`; an object is
    /// parsed as a nested criteria.
    fn promote(arg: &Value) -> Result<Criteria, QueryError> {
        match arg {
            Value::Object(_) => Criteria::parse(arg),
            other => Ok(Criteria {
                clauses: vec![Clause::Eq(other.clone())],
            }),
        }
    }

    fn parse_operator(op: &str, arg: &Value) -> Result<Clause, QueryError> {
        Ok(match op {
            "eq" => Clause::Eq(arg.clone()),
            "ne" => Clause::Ne(arg.clone()),
            "lt" => Clause::Lt(arg.clone()),
            "lte" => Clause::Lte(arg.clone()),
            "gt" => Clause::Gt(arg.clone()),
            "gte" => Clause::Gte(arg.clone()),
            "in" => Clause::In(Self::expect_array(op, arg)?),
            "nin" => Clause::Nin(Self::expect_array(op, arg)?),
            "like" => Clause::Like(LikePattern::parse(Self::expect_str(op, arg)?)?),
            "and" => Clause::And(Self::parse_each(op, arg)?),
            "or" => Clause::Or(Self::parse_each(op, arg)?),
            "nor" => Clause::Nor(Self::parse_each(op, arg)?),
            "not" => Clause::Not(Box::new(Criteria::parse(arg)?)),
            "any" => Clause::Any(Box::new(Criteria::parse(arg)?)),
            "all" => Clause::AllOf(Box::new(Criteria::parse(arg)?)),
            "length" => Clause::Length(Box::new(Self::promote(arg)?)),
            other => return Err(QueryError::UnknownOperator(format!("${other}"))),
        })
    }

    fn parse_each(op: &str, arg: &Value) -> Result<Vec<Criteria>, QueryError> {
        let items = Self::expect_array(op, arg)?;
        items.iter().map(Criteria::parse).collect()
    }

    fn expect_array(op: &str, arg: &Value) -> Result<Vec<Value>, QueryError> {
        arg.as_array().cloned().ok_or_else(|| QueryError::BadOperand {
            operator: format!("${op}"),
            expected: "an array",
            got: arg.to_string(),
        })
    }

    fn expect_str(op: &str, arg: &Value) -> Result<&str, QueryError> {
        arg.as_str().ok_or_else(|| QueryError::BadOperand {
            operator: format!("${op}"),
            expected: "a string",
            got: arg.to_string(),
        })
    }

    /// Evaluate this criteria against a candidate value (a full document for a
    /// top-level criteria, or a resolved field/array-element value for a nested one).
    pub fn matches(&self, value: &Value) -> bool {
        self.matches_opt(Some(value))
    }

    fn matches_opt(&self, value: Option<&Value>) -> bool {
        self.clauses.iter().all(|clause| clause.matches(value))
    }
}

impl Clause {
    fn matches(&self, what: Option<&Value>) -> bool {
        match self {
            Clause::And(subs) => subs.iter().all(|c| c.matches_opt(what)),
            Clause::Or(subs) => subs.iter().any(|c| c.matches_opt(what)),
            Clause::Nor(subs) => !subs.iter().any(|c| c.matches_opt(what)),
            Clause::Not(sub) => !sub.matches_opt(what),
            Clause::Field(path, sub) => {
                let resolved = what.and_then(|v| get_path(v, path));
                sub.matches_opt(resolved)
            }
            Clause::Eq(arg) => what == Some(arg),
            Clause::Ne(arg) => what != Some(arg),
            Clause::Lt(arg) => compare(what, arg) == Some(std::cmp::Ordering::Less),
            Clause::Lte(arg) => matches!(
                compare(what, arg),
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            ),
            Clause::Gt(arg) => compare(what, arg) == Some(std::cmp::Ordering::Greater),
            Clause::Gte(arg) => matches!(
                compare(what, arg),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ),
            Clause::In(items) => what.map(|w| items.contains(w)).unwrap_or(false),
            Clause::Nin(items) => !what.map(|w| items.contains(w)).unwrap_or(false),
            Clause::Like(pattern) => pattern.matches(what),
            Clause::Any(sub) => what
                .and_then(Value::as_array)
                .map(|arr| arr.iter().any(|el| sub.matches(el)))
                .unwrap_or(false),
            Clause::AllOf(sub) => what
                .and_then(Value::as_array)
                .map(|arr| arr.iter().all(|el| sub.matches(el)))
                .unwrap_or(false),
            Clause::Length(sub) => {
                let len = what.and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);
                sub.matches(&Value::from(len))
            }
        }
    }
}

fn compare(what: Option<&Value>, arg: &Value) -> Option<std::cmp::Ordering> {
    use std::cmp::Ordering;
    let what = what?;
    match (what, arg) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None::<Ordering>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test(value: Value, criteria: Value) -> bool {
        Criteria::parse(&criteria).unwrap().matches(&value)
    }

    #[test]
    fn nested_dotted_field_gt() {
        assert!(test(json!({"a": {"b": 42}}), json!({"a.b": {"$gt": 40}})));
    }

    #[test]
    fn missing_field_does_not_equal_value() {
        assert!(test(json!({"a": {"b": 42}}), json!({"a.c": {"$ne": 42}})));
    }

    #[test]
    fn like_substring() {
        assert!(test(json!("a string value"), json!({"$like": "%str%"})));
    }

    #[test]
    fn like_without_wildcard_is_an_error() {
        let err = Criteria::parse(&json!({"$like": "rrr"})).unwrap_err();
        assert_eq!(err, QueryError::LikeMissingWildcard("rrr".into()));
    }

    #[test]
    fn like_prefix_and_suffix() {
        assert!(test(json!("prefix_x"), json!({"$like": "prefix%"})));
        assert!(test(json!("x_suffix"), json!({"$like": "%suffix"})));
        assert!(!test(json!("nope"), json!({"$like": "prefix%"})));
    }

    #[test]
    fn bare_value_promotes_to_eq() {
        assert!(test(json!({"status": "active"}), json!({"status": "active"})));
        assert!(!test(json!({"status": "active"}), json!({"status": "inactive"})));
    }

    #[test]
    fn logical_and_or_nor_not() {
        let doc = json!({"a": 1, "b": 2});
        assert!(test(doc.clone(), json!({"$and": [{"a": 1}, {"b": 2}]})));
        assert!(test(doc.clone(), json!({"$or": [{"a": 99}, {"b": 2}]})));
        assert!(test(doc.clone(), json!({"$nor": [{"a": 99}, {"b": 99}]})));
        assert!(test(doc.clone(), json!({"$not": {"a": 99}})));
    }

    #[test]
    fn any_all_length_on_arrays() {
        let doc = json!({"tags": [1, 2, 3]});
        assert!(test(doc.clone(), json!({"tags": {"$any": {"$eq": 2}}})));
        assert!(!test(doc.clone(), json!({"tags": {"$any": {"$eq": 9}}})));
        assert!(test(doc.clone(), json!({"tags": {"$all": {"$gt": 0}}})));
        assert!(!test(doc.clone(), json!({"tags": {"$all": {"$gt": 1}}})));
        assert!(test(doc.clone(), json!({"tags": {"$length": 3}})));
        assert!(test(doc.clone(), json!({"tags": {"$length": {"$gte": 3}}})));
    }

    #[test]
    fn in_and_nin() {
        let doc = json!({"a": 2});
        assert!(test(doc.clone(), json!({"a": {"$in": [1, 2, 3]}})));
        assert!(test(doc.clone(), json!({"a": {"$nin": [4, 5]}})));
    }

    #[test]
    fn empty_criteria_matches_anything() {
        assert!(Criteria::any().matches(&json!({"whatever": true})));
    }

    #[test]
    fn unknown_operator_is_an_error() {
        assert_eq!(
            Criteria::parse(&json!({"$bogus": 1})).unwrap_err(),
            QueryError::UnknownOperator("$bogus".into())
        );
    }
}
