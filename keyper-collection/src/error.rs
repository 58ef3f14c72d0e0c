use keyper_core::KeyError;
use keyper_datasource::SourceError;
use keyper_query::QueryError;
use thiserror::Error;

/// Errors raised by a `Collection`: configuration mistakes made while building it,
/// misuse of its API, lookup misses, and errors propagated from the query layer, the
/// key layer, or the Data Source boundary (spec.md §7).
#[derive(Error, Debug)]
pub enum CollectionError {
    /// Primary-key derivation failed for a payload being inserted.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// A `Criteria`/`Ordering` spec failed to parse or was misused (`offset`/`limit`
    /// without `orderBy`).
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The Data Source rejected a request; propagated verbatim to the caller.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// `relations[field]` names a collection that was never created and never
    /// appeared via deferred wiring.
    #[error("relation `{field}` targets unknown collection `{collection}`")]
    UnknownRelationTarget { field: String, collection: String },

    /// A relation or back-reference name collides with another already declared on
    /// this collection.
    #[error("relation/back-reference name `{0}` is already declared on this collection")]
    DuplicateRelationName(String),

    /// `config.parent` names a field that isn't a declared relation.
    #[error("parent relation `{0}` is not a declared relation field")]
    ParentNotARelation(String),

    /// A compound primary key has no single field to derive a default foreign-key
    /// name from; the relation config must supply `foreign_key` explicitly.
    #[error("relation `{0}` targets a collection with a compound primary key; `foreign_key` must be given explicitly")]
    CompoundKeyNeedsExplicitForeignKey(String),

    /// `$like` with neither a leading nor trailing wildcard, surfaced through
    /// `Collection::filter`/`fetch`.
    #[error("`$like` pattern `{0}` has no wildcard")]
    LikeMissingWildcard(String),

    /// `Collection::get` (cache-only) found nothing cached for this pk.
    #[error("no cached entity for pk `{0}`")]
    NotCached(String),

    /// `getDiff`/`update(inplace)` was handed a mutable clone that was never taken
    /// from this collection's cache (its pk does not match any instance this
    /// collection produced via `get_mutable`).
    #[error("mutable entity pk `{0}` does not match any entity this collection produced")]
    ForeignMutable(String),

    /// A relation accessor resolution failed, re-thrown with the field path that
    /// triggered it (spec.md §4.4, "re-thrown wrapped with the field path").
    #[error("relation `{field}` could not be resolved: {source}")]
    RelationResolution {
        field: String,
        #[source]
        source: Box<CollectionError>,
    },

    /// A relation/back-reference was resolved before `Db::create_collection`
    /// finished wiring `bind_registry` onto this collection.
    #[error("collection `{0}` is not yet bound to a registry")]
    Unbound(String),
}

/// Pending-request dedup (`keyper_collection::pending`) shares results between
/// callers through a `futures::future::Shared`, which requires a `Clone` output;
/// errors are cloned structurally rather than by reference since `CollectionError`
/// aggregates foreign error types that aren't all `Clone` themselves.
impl Clone for CollectionError {
    fn clone(&self) -> Self {
        match self {
            CollectionError::Key(e) => CollectionError::Key(e.clone()),
            CollectionError::Query(e) => CollectionError::Query(e.clone()),
            CollectionError::Source(e) => CollectionError::Source(e.clone()),
            CollectionError::UnknownRelationTarget { field, collection } => {
                CollectionError::UnknownRelationTarget {
                    field: field.clone(),
                    collection: collection.clone(),
                }
            }
            CollectionError::DuplicateRelationName(n) => CollectionError::DuplicateRelationName(n.clone()),
            CollectionError::ParentNotARelation(n) => CollectionError::ParentNotARelation(n.clone()),
            CollectionError::CompoundKeyNeedsExplicitForeignKey(n) => {
                CollectionError::CompoundKeyNeedsExplicitForeignKey(n.clone())
            }
            CollectionError::LikeMissingWildcard(n) => CollectionError::LikeMissingWildcard(n.clone()),
            CollectionError::NotCached(n) => CollectionError::NotCached(n.clone()),
            CollectionError::ForeignMutable(n) => CollectionError::ForeignMutable(n.clone()),
            CollectionError::RelationResolution { field, source } => CollectionError::RelationResolution {
                field: field.clone(),
                source: source.clone(),
            },
            CollectionError::Unbound(n) => CollectionError::Unbound(n.clone()),
        }
    }
}
