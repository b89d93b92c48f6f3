//! Relation schemas announced by the replication stream and their per-session cache.

mod cache;
mod relation;

pub use cache::{DecodedValues, RelationCache};
pub use relation::{Relation, RelationColumn, RelationId};
