//! Utilities for testing change data capture code.
//!
//! - [`message`] - builders for relations and tuples
//! - [`memory_endpoints`] - in-memory replication endpoints mimicking Postgres
//! - [`database`] - access to a real Postgres for integration tests

pub mod database;
pub mod memory_endpoints;
pub mod message;
