use keyper_collection::CollectionError;
use thiserror::Error;

/// Errors raised while building or looking up collections on a `Db`
/// (spec.md §4.4, wiring; §9, "registry keyed by name").
#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("no collection named `{0}` has been created")]
    UnknownCollection(String),

    #[error("a collection named `{0}` already exists")]
    DuplicateCollection(String),

    /// Wiring a relation/back-reference/parent failed while creating a collection.
    #[error("failed to wire collection `{collection}`: {source}")]
    Wiring {
        collection: String,
        #[source]
        source: CollectionError,
    },
}
