//! The Data Source contract (spec.md §6): the single boundary a `Collection` fetches
//! through and writes back to. Keyper ships no concrete implementation — a REST
//! client, a SQL adapter, an in-memory test double are all just `impl DataSource`.

mod error;
mod params;

pub use error::SourceError;
pub use params::FetchParams;

use async_trait::async_trait;
use keyper_core::{Key, SliceArray};
use serde_json::{Map, Value};

/// A raw attribute map returned by a Data Source. Must contain all primary-key
/// components for the owning collection; `Collection::insert` rejects anything that
/// doesn't (spec.md §6, "rawEntity must be an attribute map containing all primary-
/// key components").
pub type RawEntity = Map<String, Value>;

/// An opaque CRUD provider a `Collection` reads from and writes through.
///
/// Implementations decide how `params`/`opts` are serialized for their backend;
/// Keyper only requires the contract below. All methods are `&self` — a Data Source
/// holds whatever connection pool or client state it needs internally.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch a single entity by primary key. Must reject with
    /// [`SourceError::NotFound`] (or an equivalent wrapped error) when absent —
    /// Keyper does not distinguish "not found" from other failures beyond that.
    async fn find_one(&self, pk: &Key, opts: &Value) -> Result<RawEntity, SourceError>;

    /// Fetch a page of entities matching `params`. The returned slice may carry a
    /// `total` distinct from its length when `params.limit`/`params.offset` paged a
    /// larger full match (spec.md §6, "MAY carry a `total` property").
    async fn find(&self, params: &FetchParams, opts: &Value) -> Result<SliceArray<RawEntity>, SourceError>;

    /// Batch-fetch by primary key. Order is not significant; omitting pks that don't
    /// exist is permitted — the caller (`Collection::fetch_all`) handles the gap.
    async fn find_all(&self, pks: &[Key], opts: &Value) -> Result<Vec<RawEntity>, SourceError>;

    /// Create a new entity. The response is authoritative and becomes the cached
    /// snapshot (spec.md §4.5, "response becomes authoritative").
    async fn create(&self, payload: &RawEntity, opts: &Value) -> Result<RawEntity, SourceError>;

    /// Update an existing entity, sending either the full payload or a computed
    /// diff depending on how the caller invoked `Collection::update`.
    async fn update(&self, pk: &Key, payload: &RawEntity, opts: &Value) -> Result<RawEntity, SourceError>;

    /// Delete an entity by primary key.
    async fn delete(&self, pk: &Key, opts: &Value) -> Result<(), SourceError>;
}
