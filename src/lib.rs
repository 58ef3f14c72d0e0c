//! Keyper is an in-memory entity store that sits between application code and a
//! remote backing store (a "Data Source"): immutable entity snapshots keyed by
//! primary key, secondary indexes, a relation graph between collections,
//! deduplicated in-flight fetches, cached query results, and live, auto-updating
//! filtered views.
//!
//! This crate is a facade over Keyper's subsystem crates, the same way the teacher
//! project's top-level binary crate depends on its `*-core`/`*-cache`/`*-query`/
//! `*-storage` crates: application code depends on `keyper` alone and reaches
//! everything through this module.
//!
//! Keyper installs no global `tracing` subscriber of its own — every subsystem logs
//! through `tracing`, but wiring up a subscriber (`tracing_subscriber::fmt`, or
//! anything else) is left to the application, exactly as with the library crates it
//! is modeled on.

pub use keyper_core::{
    deep_assign, deep_eq, get_path, get_path_in_map, stable_key, Entity, Key, KeyError, KeyPart,
    PrimaryKeyFields, SliceArray,
};
pub use keyper_query::{Criteria, Ordering, QueryError};
pub use keyper_index::{NonUniqueIndex, UniqueIndex};
pub use keyper_collection::{
    BackRefInfo, Collection, CollectionConfig, CollectionError, FetchAllOptions, FetchOneOptions,
    FetchOptions, InsertedEvent, MutableEntity, PayloadTransform, RelatedValue, RelationConfig,
    RelationMask,
};
pub use keyper_datasource::{DataSource, FetchParams, RawEntity, SourceError};
pub use keyper_db::{CollectionDefaults, Db, DbError};
pub use keyper_view::{CollectionView, LoadMoreView, PaginatedView};

use thiserror::Error;

/// Aggregated top-level error, for application code that wants one `Result` type
/// spanning every Keyper subsystem rather than matching on each crate's own error
/// enum (spec.md §7; mirrors the teacher's top-level error aggregating per-subsystem
/// enums via `#[from]`).
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Db(#[from] DbError),
}
