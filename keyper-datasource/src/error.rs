use thiserror::Error;

/// Error crossing the Data Source boundary. A concrete Data Source implementation
/// wraps whatever error it produces (HTTP status, serialization failure, I/O) behind
/// `anyhow::Error`; Keyper never inspects it beyond propagating it to the caller
/// (spec.md §7, "Propagated").
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("entity not found")]
    NotFound,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Clone for SourceError {
    fn clone(&self) -> Self {
        match self {
            SourceError::NotFound => SourceError::NotFound,
            SourceError::Other(err) => SourceError::Other(anyhow::anyhow!(err.to_string())),
        }
    }
}
