//! Error types and result definitions for change data capture operations.
//!
//! [`CdcError`] carries a classification ([`ErrorKind`]), a static description, optional dynamic
//! detail, an optional source and the callsite location. Several errors can be aggregated into a
//! single [`CdcError`], which is how endpoint cleanup reports failures of independent steps.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::conversions::numeric::ParseNumericError;

/// Convenient result type for operations failing with [`CdcError`].
pub type CdcResult<T> = Result<T, CdcError>;

/// Detailed payload stored for single [`CdcError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type of the crate.
///
/// A [`CdcError`] is either a single classified error or an aggregate of several errors. The
/// aggregate reports the kind of its first error through [`CdcError::kind`] and every kind
/// through [`CdcError::kinds`].
#[derive(Debug, Clone)]
pub struct CdcError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    Many {
        errors: Vec<CdcError>,
        location: &'static Location<'static>,
    },
}

/// Classification of errors, grouped by the stage of the pipeline that produces them.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    AuthenticationError,
    EncryptionError,

    // Query & Execution Errors
    SourceQueryFailed,
    SourceOperationCanceled,
    SourceDatabaseShutdown,

    // Protocol Errors
    /// A data message referenced a relation which was never announced in this session.
    RelationNotFound,

    // Data & Transformation Errors
    ConversionError,
    InvalidData,
    /// A tuple carried an unchanged TOAST marker, so the column value is not available.
    UnchangedToastValue,

    // Position Errors
    InvalidPosition,

    // Delivery Errors
    /// The caller requested shutdown while a record was waiting to be delivered.
    OperationCanceled,
    /// The consumer of the record channel went away.
    RecordChannelClosed,

    // Endpoint Errors
    PublicationNotFound,
    PublicationAlreadyExists,
    ReplicationSlotNotFound,
    ReplicationSlotAlreadyExists,
    ReplicationSlotNotCreated,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    DeserializationError,

    // State Errors
    InvalidState,

    // General Errors
    SourceError,
    Unknown,
}

impl CdcError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`] if
    /// the aggregate is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the static description of the error, or `None` for aggregates.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For aggregated errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    /// Wraps this error with a description of the operation that produced it.
    ///
    /// The kind is preserved so callers can keep matching on it, and the wrapped error becomes
    /// the source of the returned one.
    #[track_caller]
    pub fn context(self, description: &'static str, detail: impl Into<Cow<'static, str>>) -> Self {
        let kind = self.kind();
        let detail = match self.detail() {
            Some(inner_detail) => Cow::Owned(format!("{}: {inner_detail}", detail.into())),
            None => detail.into(),
        };

        CdcError::from_components(kind, Cow::Borrowed(description), Some(detail), None)
            .with_source(self)
    }

    /// Creates a [`CdcError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        CdcError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for CdcError {
    fn eq(&self, other: &CdcError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for CdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f, 1)
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                }

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    let mut lines = rendered.lines();
                    if let Some(first_line) = lines.next() {
                        write!(f, "\n  {}. {}", index + 1, first_line)?;
                    }

                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for CdcError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes the detail block with indentation.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    if let Some(detail) = detail {
        let indent_str = "  ".repeat(indent);
        if detail.trim().is_empty() {
            write!(f, "\n{indent_str}Detail: <empty>")?;
        } else {
            write!(f, "\n{indent_str}Detail:")?;
            for line in detail.lines() {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for CdcError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> CdcError {
        CdcError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for CdcError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> CdcError {
        CdcError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A vector with exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for CdcError
where
    E: Into<CdcError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> CdcError {
        let location = Location::caller();

        let mut errors: Vec<CdcError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        CdcError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Implements a [`From`] conversion which maps a leaf error to a fixed kind and description,
/// keeping its message as detail and the error itself as source.
macro_rules! impl_from_leaf_error {
    ($error:ty, $kind:expr, $description:expr) => {
        impl From<$error> for CdcError {
            #[track_caller]
            fn from(err: $error) -> CdcError {
                let detail = err.to_string();
                CdcError::from_components(
                    $kind,
                    Cow::Borrowed($description),
                    Some(Cow::Owned(detail)),
                    Some(Arc::new(err)),
                )
            }
        }
    };
}

impl_from_leaf_error!(std::io::Error, ErrorKind::IoError, "I/O operation failed");
impl_from_leaf_error!(
    std::str::Utf8Error,
    ErrorKind::ConversionError,
    "UTF-8 conversion failed"
);
impl_from_leaf_error!(
    std::num::ParseIntError,
    ErrorKind::ConversionError,
    "Integer parsing failed"
);
impl_from_leaf_error!(
    std::num::ParseFloatError,
    ErrorKind::ConversionError,
    "Float parsing failed"
);
impl_from_leaf_error!(
    ParseNumericError,
    ErrorKind::ConversionError,
    "Numeric parsing failed"
);
impl_from_leaf_error!(
    chrono::ParseError,
    ErrorKind::ConversionError,
    "Datetime parsing failed"
);
impl_from_leaf_error!(uuid::Error, ErrorKind::ConversionError, "UUID parsing failed");
impl_from_leaf_error!(
    rustls::Error,
    ErrorKind::EncryptionError,
    "TLS configuration failed"
);
impl_from_leaf_error!(
    postgres::types::ParseLsnError,
    ErrorKind::InvalidPosition,
    "LSN parsing failed"
);
impl_from_leaf_error!(
    config::shared::ValidationError,
    ErrorKind::ConfigError,
    "Configuration is invalid"
);
impl_from_leaf_error!(
    postgres::replication::slots::SlotNameError,
    ErrorKind::ConfigError,
    "Replication slot name is invalid"
);

/// Converts [`serde_json::Error`] to [`CdcError`], distinguishing I/O from decoding failures.
impl From<serde_json::Error> for CdcError {
    #[track_caller]
    fn from(err: serde_json::Error) -> CdcError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        CdcError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`tokio_postgres::Error`] to [`CdcError`] based on its SQLSTATE code.
///
/// Object existence codes are mapped to generic kinds here. Callers which know which object a
/// statement targets (publication or slot) refine them into the dedicated endpoint kinds.
impl From<tokio_postgres::Error> for CdcError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> CdcError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(sqlstate) => match *sqlstate {
                SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                | SqlState::TOO_MANY_CONNECTIONS => (
                    ErrorKind::SourceConnectionFailed,
                    "PostgreSQL connection failed",
                ),
                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::AuthenticationError,
                    "PostgreSQL authentication failed",
                ),
                SqlState::UNDEFINED_OBJECT | SqlState::UNDEFINED_TABLE => (
                    ErrorKind::SourceQueryFailed,
                    "PostgreSQL object does not exist",
                ),
                SqlState::DUPLICATE_OBJECT => (
                    ErrorKind::SourceQueryFailed,
                    "PostgreSQL object already exists",
                ),
                SqlState::SYNTAX_ERROR
                | SqlState::SYNTAX_ERROR_OR_ACCESS_RULE_VIOLATION
                | SqlState::INSUFFICIENT_PRIVILEGE => (
                    ErrorKind::SourceQueryFailed,
                    "PostgreSQL syntax or access error",
                ),
                SqlState::OBJECT_IN_USE | SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE => {
                    (ErrorKind::InvalidState, "PostgreSQL object in use")
                }
                SqlState::QUERY_CANCELED | SqlState::OPERATOR_INTERVENTION => (
                    ErrorKind::SourceOperationCanceled,
                    "PostgreSQL operation canceled",
                ),
                SqlState::ADMIN_SHUTDOWN | SqlState::CRASH_SHUTDOWN => (
                    ErrorKind::SourceDatabaseShutdown,
                    "PostgreSQL shutdown",
                ),
                SqlState::DATA_EXCEPTION | SqlState::INVALID_TEXT_REPRESENTATION => (
                    ErrorKind::ConversionError,
                    "PostgreSQL data conversion failed",
                ),
                _ => (ErrorKind::SourceError, "PostgreSQL error"),
            },
            // No SQL state means connection issue
            None => (
                ErrorKind::SourceConnectionFailed,
                "PostgreSQL connection failed",
            ),
        };

        let detail = match err.as_db_error() {
            Some(db_error) => db_error.message().to_string(),
            None => err.to_string(),
        };
        CdcError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, cdc_error};

    fn failing_operation() -> CdcResult<()> {
        bail!(
            ErrorKind::ReplicationSlotNotFound,
            "Replication slot not found",
            r#"replication slot "s4" does not exist"#
        );
    }

    #[test]
    fn single_error_renders_kind_description_and_detail() {
        let err = failing_operation().unwrap_err();
        let rendered = err.to_string();

        assert_eq!(err.kind(), ErrorKind::ReplicationSlotNotFound);
        assert!(rendered.starts_with("[ReplicationSlotNotFound] Replication slot not found @"));
        assert!(rendered.contains(r#"replication slot "s4" does not exist"#));
    }

    #[test]
    fn aggregate_of_one_is_the_error_itself() {
        let err = CdcError::from(vec![cdc_error!(ErrorKind::ConfigError, "Bad config")]);
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert_eq!(err.description(), Some("Bad config"));
    }

    #[test]
    fn aggregate_reports_every_error() {
        let err = CdcError::from(vec![
            cdc_error!(ErrorKind::PublicationNotFound, "Publication not found", "p1"),
            cdc_error!(ErrorKind::ReplicationSlotNotFound, "Replication slot not found", "s1"),
        ]);

        assert_eq!(err.kind(), ErrorKind::PublicationNotFound);
        assert_eq!(
            err.kinds(),
            vec![
                ErrorKind::PublicationNotFound,
                ErrorKind::ReplicationSlotNotFound
            ]
        );

        let rendered = err.to_string();
        assert!(rendered.starts_with("[Many] 2 errors aggregated"));
        assert!(rendered.contains("p1"));
        assert!(rendered.contains("s1"));
    }

    #[test]
    fn context_preserves_kind_and_chains_source() {
        let inner = cdc_error!(ErrorKind::RelationNotFound, "Relation not found", "relation 7");
        let err = inner.context("Insert message handling failed", "lsn 0/16");

        assert_eq!(err.kind(), ErrorKind::RelationNotFound);
        assert_eq!(err.detail(), Some("lsn 0/16: relation 7"));
        assert!(error::Error::source(&err).is_some());
    }

    #[test]
    fn json_errors_are_deserialization_errors() {
        let err: CdcError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);

        let err: CdcError = serde_json::from_str::<u8>("300").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }
}
