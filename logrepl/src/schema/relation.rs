use std::fmt;
use tokio_postgres::types::Type;

/// Identifier of a relation, stable for the duration of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A column as described by a relation message.
///
/// Values of the column are decoded from their text representation according to `typ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationColumn {
    pub name: String,
    pub typ: Type,
    pub modifier: i32,
    /// `1` when the column is part of the replica identity.
    pub flags: i8,
}

impl RelationColumn {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
            modifier: -1,
            flags: 0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.flags & 1 == 1
    }
}

/// Schema of a table as last announced by the replication stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub id: RelationId,
    pub namespace: String,
    pub name: String,
    /// Columns in tuple order.
    pub columns: Vec<RelationColumn>,
}

impl Relation {
    pub fn new(
        id: RelationId,
        namespace: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<RelationColumn>,
    ) -> Self {
        Self {
            id,
            namespace: namespace.into(),
            name: name.into(),
            columns,
        }
    }

    /// Returns the schema qualified name, e.g. `public.users`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}
