use std::sync::Arc;

use crate::collection::Collection;

/// Cross-collection lookup, implemented by `keyper_db::Db`.
///
/// `keyper-collection` cannot depend on `keyper-db` (the dependency runs the other
/// way), so relation hydration, back-reference resolution, and parent/child wiring
/// reach sibling collections through this trait object instead of a concrete `Db`
/// type — the Design Notes' "registry keyed by name; accessors always perform
/// lookup through the registry rather than holding direct references" (spec.md §9),
/// realized as a trait boundary rather than string-keyed dynamic lookup.
pub trait CollectionRegistry: Send + Sync {
    fn collection(&self, name: &str) -> Option<Arc<Collection>>;
}
