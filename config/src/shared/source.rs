use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::shared::{EndpointConfig, ValidationError};

/// Default capacity of the channel between the change handler and the record consumer.
pub const DEFAULT_RECORD_BUFFER_SIZE: usize = 1024;

fn default_record_buffer_size() -> usize {
    DEFAULT_RECORD_BUFFER_SIZE
}

/// Configuration of a change data capture source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    pub endpoint: EndpointConfig,
    /// Key column per table name. Tables without an entry produce records with an empty key.
    #[serde(default)]
    pub table_keys: HashMap<String, String>,
    /// Capacity of the bounded record channel.
    #[serde(default = "default_record_buffer_size")]
    pub record_buffer_size: usize,
    /// Position token to resume streaming from. When absent, streaming starts from the slot's
    /// confirmed flush position.
    #[serde(default)]
    pub position: Option<String>,
}

impl SourceConfig {
    /// Validates the config for a streaming session, which needs both endpoints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.endpoint.validate()?;

        if self.endpoint.slot_name.is_none() || self.endpoint.publication_name.is_none() {
            return Err(ValidationError::MissingStreamingEndpoints);
        }

        if self.record_buffer_size == 0 {
            return Err(ValidationError::ZeroRecordBufferSize);
        }

        Ok(())
    }
}
