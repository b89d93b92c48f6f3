use postgres::replication::slots::SlotNameError;
use thiserror::Error;

/// Errors returned when a configuration is structurally valid but semantically unusable.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("tls is enabled but no trusted root certificates were provided")]
    MissingTrustedRootCerts,

    #[error("the connection url must not be empty")]
    EmptyConnectionUrl,

    #[error("invalid slot name: {0}")]
    InvalidSlotName(#[from] SlotNameError),

    #[error("the {0} name must not be empty when set")]
    EmptyName(&'static str),

    #[error("streaming requires both a slot name and a publication name")]
    MissingStreamingEndpoints,

    #[error("the record buffer size must be greater than zero")]
    ZeroRecordBufferSize,
}
