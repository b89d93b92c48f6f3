//! Conversions from the Postgres text representation to [`crate::types::Cell`] values.

pub mod bool;
pub mod hex;
pub mod numeric;
pub mod text;
