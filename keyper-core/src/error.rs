use serde_json::Value;
use thiserror::Error;

/// Errors raised while deriving or comparing primary keys.
#[derive(Error, Debug, Clone)]
pub enum KeyError {
    #[error("primary key component `{0}` is missing from the payload")]
    MissingComponent(String),

    #[error("value cannot be used as a key component: {0}")]
    UnsupportedKeyPart(Value),
}
