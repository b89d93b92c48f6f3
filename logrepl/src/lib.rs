//! Change data capture from Postgres logical replication.
//!
//! Changes are read from a replication slot through the `pgoutput` plugin, decoded against the
//! relations announced by the stream and turned into [`types::Record`]s delivered on a bounded
//! channel. The [`replication::endpoints`] module manages the publication and slot the stream
//! depends on.

pub mod concurrency;
pub mod conversions;
pub mod error;
mod macros;
pub mod replication;
pub mod schema;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
