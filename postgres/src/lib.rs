//! Postgres helpers shared by the change data capture crates.
//!
//! Contains type lookups, LSN parsing and replication slot naming rules which do not
//! depend on the decoding pipeline itself.

pub mod replication;
pub mod time;
pub mod types;
