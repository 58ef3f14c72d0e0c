use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::error::KeyError;

/// A single component of a primary key: either a string or a number.
///
/// Numbers are stored as `f64` so that `1` and `1.0` compare and stringify the same
/// way they would as loosely-typed JSON values, matching the source project's
/// JS-number-keyed semantics (see DESIGN.md).
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
    String(String),
    Number(f64),
}

impl KeyPart {
    pub fn from_value(value: &Value) -> Result<Self, KeyError> {
        match value {
            Value::String(s) => Ok(KeyPart::String(s.clone())),
            Value::Number(n) => n
                .as_f64()
                .map(KeyPart::Number)
                .ok_or_else(|| KeyError::UnsupportedKeyPart(value.clone())),
            other => Err(KeyError::UnsupportedKeyPart(other.clone())),
        }
    }

    /// String-coerced form used for map lookups and bucket keys.
    pub fn stringify(&self) -> String {
        match self {
            KeyPart::String(s) => s.clone(),
            KeyPart::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

impl Eq for KeyPart {}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Number(a), KeyPart::Number(b)) => a.total_cmp(b),
            (KeyPart::String(a), KeyPart::String(b)) => a.cmp(b),
            // Mixed comparisons fall back to lexical comparison of the stringified
            // form; a collection should never mix key types for the same field in
            // practice, but ordering must still be total.
            _ => self.stringify().cmp(&other.stringify()),
        }
    }
}

/// A primary key: a single value, or an ordered tuple for compound keys.
///
/// Keys are immutable. Equality and map-lookup identity use the string-coerced form
/// (`Key::fingerprint`); ordering is lexical over the tuple's components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Single(KeyPart),
    Compound(Vec<KeyPart>),
}

impl Key {
    pub fn single(part: KeyPart) -> Self {
        Key::Single(part)
    }

    pub fn compound(parts: Vec<KeyPart>) -> Self {
        debug_assert!(!parts.is_empty(), "compound key must have at least one part");
        Key::Compound(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        match self {
            Key::Single(p) => std::slice::from_ref(p),
            Key::Compound(ps) => ps,
        }
    }

    /// Stable string form used as the hash-map lookup key.
    pub fn fingerprint(&self) -> String {
        match self {
            Key::Single(p) => p.stringify(),
            Key::Compound(parts) => parts
                .iter()
                .map(KeyPart::stringify)
                .collect::<Vec<_>>()
                .join("\u{1}"),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts().cmp(other.parts())
    }
}

impl std::hash::Hash for Key {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

/// Names of the fields that make up a collection's primary key, in order.
#[derive(Debug, Clone)]
pub enum PrimaryKeyFields {
    Single(String),
    Compound(Vec<String>),
}

impl PrimaryKeyFields {
    pub fn fields(&self) -> &[String] {
        match self {
            PrimaryKeyFields::Single(f) => std::slice::from_ref(f),
            PrimaryKeyFields::Compound(fs) => fs,
        }
    }

    /// Derive the key for a raw attribute map, failing if any component is missing.
    pub fn extract(&self, raw: &serde_json::Map<String, Value>) -> Result<Key, KeyError> {
        match self {
            PrimaryKeyFields::Single(field) => {
                let value = raw
                    .get(field)
                    .ok_or_else(|| KeyError::MissingComponent(field.clone()))?;
                Ok(Key::single(KeyPart::from_value(value)?))
            }
            PrimaryKeyFields::Compound(fields) => {
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    let value = raw
                        .get(field)
                        .ok_or_else(|| KeyError::MissingComponent(field.clone()))?;
                    parts.push(KeyPart::from_value(value)?);
                }
                Ok(Key::compound(parts))
            }
        }
    }
}

impl From<&str> for PrimaryKeyFields {
    fn from(field: &str) -> Self {
        PrimaryKeyFields::Single(field.to_string())
    }
}

impl From<Vec<String>> for PrimaryKeyFields {
    fn from(fields: Vec<String>) -> Self {
        if fields.len() == 1 {
            PrimaryKeyFields::Single(fields.into_iter().next().unwrap())
        } else {
            PrimaryKeyFields::Compound(fields)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_key_parts_stringify_without_fraction() {
        let key = Key::single(KeyPart::Number(42.0));
        assert_eq!(key.fingerprint(), "42");
    }

    #[test]
    fn compound_keys_order_lexically() {
        let a = Key::compound(vec![KeyPart::String("a".into()), KeyPart::Number(1.0)]);
        let b = Key::compound(vec![KeyPart::String("a".into()), KeyPart::Number(2.0)]);
        assert!(a < b);
    }

    #[test]
    fn single_and_compound_with_one_part_are_distinct_variants_but_equal_fingerprint() {
        let single = Key::single(KeyPart::String("x".into()));
        let compound = Key::compound(vec![KeyPart::String("x".into())]);
        assert_eq!(single.fingerprint(), compound.fingerprint());
    }
}
