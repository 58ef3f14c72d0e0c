//! The Collection cache/index engine (spec.md §4): per-pk and per-query cache,
//! secondary indexes, relation graph, fetch coalescing, and the mutable-clone
//! diff/update path. This is the largest single subsystem in Keyper — everything
//! else (the `Db` registry, views) is built on top of what a `Collection` exposes.

mod cache;
mod collection;
mod config;
mod error;
mod fetch;
mod mutable;
mod options;
mod pending;
mod query;
mod registry;
mod relations;

pub use cache::BackRefInfo;
pub use collection::{Collection, InsertedEvent};
pub use config::{CollectionConfig, PayloadTransform, RelationConfig, RelationMask};
pub use error::CollectionError;
pub use mutable::MutableEntity;
pub use options::{FetchAllOptions, FetchOneOptions, FetchOptions};
pub use registry::CollectionRegistry;
pub use relations::RelatedValue;
