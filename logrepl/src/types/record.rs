use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::replication::position::PositionToken;
use crate::types::Cell;

/// Column values of a row keyed by column name.
pub type StructuredData = BTreeMap<String, Cell>;

/// Kind of change a [`Record`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Where the change happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Name of the table the change belongs to.
    pub collection: String,
    /// Schema (namespace) of that table.
    pub schema: String,
}

/// Before and after images of a changed row.
///
/// `None` means the image is absent, which is different from an image without columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Change {
    pub before: Option<StructuredData>,
    pub after: Option<StructuredData>,
}

/// A single change produced by the change handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub operation: Operation,
    pub position: PositionToken,
    pub metadata: Metadata,
    /// At most one entry: the configured key column of the collection, when present.
    pub key: StructuredData,
    pub payload: Change,
}

impl Record {
    pub fn collection(&self) -> &str {
        &self.metadata.collection
    }
}
