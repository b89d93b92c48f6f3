use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{SourceConfig, ValidationError};

/// Top level configuration of the replicator binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicatorConfig {
    pub source: SourceConfig,
}

impl ReplicatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] =
        &["source.endpoint.tables", "source.endpoint.publication_params"];
}
