use thiserror::Error;

/// Errors raised while parsing or evaluating a query (`Criteria` or `Ordering`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    #[error("`$like` pattern `{0}` has neither a leading nor a trailing `%` wildcard")]
    LikeMissingWildcard(String),

    #[error("operator `{operator}` expects {expected}, got {got}")]
    BadOperand {
        operator: String,
        expected: &'static str,
        got: String,
    },

    #[error("`offset`/`limit` require `orderBy` to be set")]
    PagingWithoutOrdering,

    #[error("sort spec entry `{0}` is not a valid field path")]
    BadSortSpec(String),
}
