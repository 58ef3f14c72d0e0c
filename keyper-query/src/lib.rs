//! The Keyper query language: a MongoDB-style predicate evaluator (`Criteria`) and a
//! multi-key sort comparator builder (`Ordering`), both operating over dotted field
//! paths against plain `serde_json::Value` documents.

mod criteria;
mod error;
mod ordering;

pub use criteria::Criteria;
pub use error::QueryError;
pub use ordering::Ordering;
