//! Postgres logical replication: endpoint lifecycle, message decoding and change handling.
//!
//! - [`endpoints`] - publication and slot lifecycle, including cleanup
//! - [`client`] - replication connection implementing the endpoint operations
//! - [`message`] - logical replication messages consumed by the handler
//! - [`position`] - resumable position tokens
//! - [`handler`] - conversion of messages into records
//! - [`stream`] - replication stream with progress reporting
//! - [`progress`] - consumer acknowledgements of written records
//! - [`apply`] - the loop driving a streaming session

pub mod apply;
pub mod client;
pub mod endpoints;
pub mod handler;
pub mod message;
pub mod position;
pub mod progress;
pub mod stream;
