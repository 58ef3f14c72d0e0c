//! Core key and entity types shared across the Keyper crates.
//!
//! This crate has no async runtime dependency and no knowledge of collections,
//! queries, or data sources — it only provides the small set of pure building
//! blocks every other Keyper crate is built on: primary keys, frozen entity
//! snapshots, dot-path field access, deep-assign, and stable JSON fingerprinting.

mod entity;
mod error;
mod key;
mod keyed;
mod merge;
mod path;
mod slice;
mod stable;

pub use entity::Entity;
pub use error::KeyError;
pub use key::{Key, KeyPart, PrimaryKeyFields};
pub use keyed::Keyed;
pub use merge::{deep_assign, deep_eq};
pub use path::{get_path, get_path_in_map};
pub use slice::SliceArray;
pub use stable::stable_key;
