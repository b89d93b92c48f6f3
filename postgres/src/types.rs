use std::str::FromStr;
use thiserror::Error;
use tokio_postgres::types::{Kind, PgLsn, Type};

/// Converts a type oid to a [`Type`] defaulting to an unnamed type in case of failure to
/// look up the type.
///
/// Relation messages only carry the oid of each column type, so types created by extensions or
/// users resolve to a simple type which is decoded from its text representation.
pub fn convert_type_oid_to_type(type_oid: u32) -> Type {
    Type::from_oid(type_oid).unwrap_or(Type::new(
        format!("unnamed_type({type_oid})"),
        type_oid,
        Kind::Simple,
        "pg_catalog".to_string(),
    ))
}

/// Error returned when a string is not a valid Postgres log sequence number.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid postgres lsn: {0:?}")]
pub struct ParseLsnError(pub String);

/// Parses a Postgres LSN in its `XXXXXXXX/XXXXXXXX` textual form.
///
/// [`PgLsn`]'s own parse error does not implement [`std::error::Error`], so this wrapper
/// keeps the rejected input around for diagnostics.
pub fn parse_lsn(value: &str) -> Result<PgLsn, ParseLsnError> {
    PgLsn::from_str(value).map_err(|_| ParseLsnError(value.to_string()))
}
