use crate::config::RelationMask;

/// Options for [`crate::Collection::fetch_one`].
#[derive(Debug, Clone, Default)]
pub struct FetchOneOptions {
    /// Skip the cache and go straight to the Data Source even if a cached snapshot
    /// exists (spec.md §4.5, "forceLoad bypasses the cache check").
    pub force_load: bool,
    /// Relation mask to hydrate in addition to the collection's default eager-load
    /// mask. `None` means "defaults only".
    pub load_relations: Option<RelationMask>,
}

/// Options for [`crate::Collection::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub force_load: bool,
    pub load_relations: Option<RelationMask>,
}

/// Options for [`crate::Collection::fetch_all`].
#[derive(Debug, Clone, Default)]
pub struct FetchAllOptions {
    pub force_load: bool,
    pub load_relations: Option<RelationMask>,
}
