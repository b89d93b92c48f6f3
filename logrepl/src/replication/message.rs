//! Logical replication messages in the shape consumed by the change handler.
//!
//! The handler works on [`LogicalMessage`] rather than on the raw `pgoutput` bodies so that
//! message handling does not depend on the wire decoder. [`LogicalMessage`] is built from the
//! decoder output with [`TryFrom`].

use bytes::Bytes;
use postgres::types::convert_type_oid_to_type;
use postgres_replication::protocol;
use postgres_replication::protocol::LogicalReplicationMessage;

use crate::error::{CdcError, CdcResult};
use crate::schema::{Relation, RelationColumn, RelationId};

/// A raw column value of a tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleValue {
    Null,
    /// The column is TOASTed and was not changed, so its value was not sent.
    UnchangedToast,
    Text(Bytes),
    Binary(Bytes),
}

/// A row as sent on the wire, paired positionally with the columns of its relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple(Vec<TupleValue>);

impl Tuple {
    pub fn new(values: Vec<TupleValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[TupleValue] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertMessage {
    pub relation_id: RelationId,
    pub new_tuple: Tuple,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMessage {
    pub relation_id: RelationId,
    /// The full old row or only its replica identity columns, depending on the table's replica
    /// identity. Absent when no before-image was logged.
    pub old_tuple: Option<Tuple>,
    pub new_tuple: Tuple,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteMessage {
    pub relation_id: RelationId,
    /// Same contents as [`UpdateMessage::old_tuple`].
    pub old_tuple: Option<Tuple>,
}

/// A logical replication message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalMessage {
    Relation(Relation),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
    /// Any message that carries no row change, tagged with its type name.
    Other(&'static str),
}

impl LogicalMessage {
    /// Name of the message type, used in logs and error details.
    pub fn type_name(&self) -> &'static str {
        match self {
            LogicalMessage::Relation(_) => "relation",
            LogicalMessage::Insert(_) => "insert",
            LogicalMessage::Update(_) => "update",
            LogicalMessage::Delete(_) => "delete",
            LogicalMessage::Other(name) => *name,
        }
    }
}

impl From<&protocol::Tuple> for Tuple {
    fn from(tuple: &protocol::Tuple) -> Self {
        let values = tuple
            .tuple_data()
            .iter()
            .map(|data| match data {
                protocol::TupleData::Null => TupleValue::Null,
                protocol::TupleData::UnchangedToast => TupleValue::UnchangedToast,
                protocol::TupleData::Text(bytes) => TupleValue::Text(bytes.clone()),
                protocol::TupleData::Binary(bytes) => TupleValue::Binary(bytes.clone()),
            })
            .collect();

        Tuple(values)
    }
}

impl TryFrom<&protocol::RelationBody> for Relation {
    type Error = CdcError;

    fn try_from(body: &protocol::RelationBody) -> Result<Self, Self::Error> {
        let columns = body
            .columns()
            .iter()
            .map(|column| -> CdcResult<RelationColumn> {
                Ok(RelationColumn {
                    name: column.name()?.to_string(),
                    typ: convert_type_oid_to_type(column.type_id() as u32),
                    modifier: column.type_modifier(),
                    flags: column.flags(),
                })
            })
            .collect::<CdcResult<Vec<_>>>()?;

        Ok(Relation::new(
            RelationId(body.rel_id()),
            body.namespace()?,
            body.name()?,
            columns,
        ))
    }
}

impl TryFrom<&LogicalReplicationMessage> for LogicalMessage {
    type Error = CdcError;

    fn try_from(message: &LogicalReplicationMessage) -> Result<Self, Self::Error> {
        let message = match message {
            LogicalReplicationMessage::Relation(body) => {
                LogicalMessage::Relation(Relation::try_from(body)?)
            }
            LogicalReplicationMessage::Insert(body) => LogicalMessage::Insert(InsertMessage {
                relation_id: RelationId(body.rel_id()),
                new_tuple: body.tuple().into(),
            }),
            LogicalReplicationMessage::Update(body) => LogicalMessage::Update(UpdateMessage {
                relation_id: RelationId(body.rel_id()),
                old_tuple: body.old_tuple().or(body.key_tuple()).map(Tuple::from),
                new_tuple: body.new_tuple().into(),
            }),
            LogicalReplicationMessage::Delete(body) => LogicalMessage::Delete(DeleteMessage {
                relation_id: RelationId(body.rel_id()),
                old_tuple: body.old_tuple().or(body.key_tuple()).map(Tuple::from),
            }),
            LogicalReplicationMessage::Begin(_) => LogicalMessage::Other("begin"),
            LogicalReplicationMessage::Commit(_) => LogicalMessage::Other("commit"),
            LogicalReplicationMessage::Origin(_) => LogicalMessage::Other("origin"),
            LogicalReplicationMessage::Type(_) => LogicalMessage::Other("type"),
            LogicalReplicationMessage::Truncate(_) => LogicalMessage::Other("truncate"),
            _ => LogicalMessage::Other("unknown"),
        };

        Ok(message)
    }
}
