//! Live, auto-updating views over a [`keyper_collection::Collection`] (spec.md
//! §4.7): [`CollectionView`] (unbounded, always-sorted subset), [`PaginatedView`]
//! (one page at a time), and [`LoadMoreView`] (accumulating pages). Each view
//! subscribes to its collection's `inserted`/`removed` signals for the lifetime of
//! a background task; dropping (or calling `dispose` on) a view tears it down.

mod collection_view;
mod common;
mod load_more_view;
mod paginated_view;

pub use collection_view::CollectionView;
pub use load_more_view::LoadMoreView;
pub use paginated_view::PaginatedView;
