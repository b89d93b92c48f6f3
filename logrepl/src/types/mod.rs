//! Value and record types produced by the change data capture pipeline.

mod cell;
mod record;

pub use cell::*;
pub use record::*;

// Re-exports.
pub use postgres::types::*;
pub use tokio_postgres::types::{PgLsn, Type};
