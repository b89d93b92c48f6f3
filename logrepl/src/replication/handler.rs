use futures::{Stream, StreamExt};
use std::collections::HashMap;
use tokio::pin;
use tokio::sync::mpsc;
use tokio_postgres::types::PgLsn;
use tracing::{debug, trace};

use crate::cdc_error;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CdcResult, ErrorKind};
use crate::replication::message::{
    DeleteMessage, InsertMessage, LogicalMessage, Tuple, UpdateMessage,
};
use crate::replication::position::encode_cdc_position;
use crate::schema::{DecodedValues, Relation, RelationCache, RelationId};
use crate::types::{Change, Metadata, Operation, Record, StructuredData};

/// Turns logical replication messages into [`Record`]s.
///
/// Messages must be handed to [`CdcHandler::handle`] in the order the server sent them. The
/// handler owns the [`RelationCache`] of the session, so relation messages are expected before
/// the data messages that reference them.
///
/// Records are delivered through a bounded channel. Delivery is the only point where the handler
/// waits, and the only point where it observes shutdown.
#[derive(Debug)]
pub struct CdcHandler {
    relations: RelationCache,
    /// Key column per table, looked up by table name and then by `schema.table`.
    table_keys: HashMap<String, String>,
    records_tx: mpsc::Sender<Record>,
    shutdown_rx: ShutdownRx,
    last_handled_lsn: Option<PgLsn>,
}

impl CdcHandler {
    pub fn new(
        table_keys: HashMap<String, String>,
        records_tx: mpsc::Sender<Record>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            relations: RelationCache::new(),
            table_keys,
            records_tx,
            shutdown_rx,
            last_handled_lsn: None,
        }
    }

    /// LSN of the last message that was fully handled, including delivery of its record.
    pub fn last_handled_lsn(&self) -> Option<PgLsn> {
        self.last_handled_lsn
    }

    pub fn relations(&self) -> &RelationCache {
        &self.relations
    }

    /// Handles a single message received at `lsn`.
    ///
    /// Relation messages update the relation cache, insert, update and delete messages produce
    /// one record each and every other message is ignored. Failures to build a record carry the
    /// message type and LSN in their detail and keep their original kind. A shutdown observed
    /// while delivering a record fails with [`ErrorKind::OperationCanceled`].
    pub async fn handle(&mut self, message: LogicalMessage, lsn: PgLsn) -> CdcResult<()> {
        let message_type = message.type_name();
        trace!(%lsn, message_type, "handling logical replication message");

        let record = match message {
            LogicalMessage::Relation(relation) => {
                debug!(
                    relation_id = %relation.id,
                    relation = %relation.qualified_name(),
                    "received relation"
                );
                self.relations.add(relation);
                None
            }
            LogicalMessage::Insert(insert) => Some(self.build_insert_record(insert, lsn)),
            LogicalMessage::Update(update) => Some(self.build_update_record(update, lsn)),
            LogicalMessage::Delete(delete) => Some(self.build_delete_record(delete, lsn)),
            LogicalMessage::Other(_) => None,
        };

        if let Some(record) = record {
            let record = record.map_err(|err| {
                err.context(
                    "Change message handling failed",
                    format!("{message_type} message at lsn {lsn}"),
                )
            })?;
            self.send(record).await?;
        }

        self.last_handled_lsn = Some(lsn);

        Ok(())
    }

    /// Handles every message of `stream` until it ends or a message fails.
    pub async fn handle_stream<S>(&mut self, stream: S) -> CdcResult<()>
    where
        S: Stream<Item = CdcResult<(LogicalMessage, PgLsn)>>,
    {
        pin!(stream);

        while let Some(item) = stream.next().await {
            let (message, lsn) = item?;
            self.handle(message, lsn).await?;
        }

        Ok(())
    }

    fn build_insert_record(&self, insert: InsertMessage, lsn: PgLsn) -> CdcResult<Record> {
        let relation = self.relations.get(insert.relation_id)?;
        let new_values = self.decode_new_values(insert.relation_id, &insert.new_tuple)?;

        self.build_record(
            relation,
            Operation::Create,
            lsn,
            &new_values,
            Change {
                before: None,
                after: into_payload(new_values.clone()),
            },
        )
    }

    fn build_update_record(&self, update: UpdateMessage, lsn: PgLsn) -> CdcResult<Record> {
        let relation = self.relations.get(update.relation_id)?;
        let new_values = self.decode_new_values(update.relation_id, &update.new_tuple)?;
        let old_values = self.decode_old_values(update.relation_id, update.old_tuple.as_ref());

        self.build_record(
            relation,
            Operation::Update,
            lsn,
            &new_values,
            Change {
                before: old_values.and_then(into_payload),
                after: into_payload(new_values.clone()),
            },
        )
    }

    fn build_delete_record(&self, delete: DeleteMessage, lsn: PgLsn) -> CdcResult<Record> {
        let relation = self.relations.get(delete.relation_id)?;
        let Some(old_tuple) = delete.old_tuple.as_ref() else {
            return Err(cdc_error!(
                ErrorKind::InvalidData,
                "Delete message has no old tuple",
                format!("relation {}", relation.qualified_name())
            ));
        };
        let old_values = self.decode_new_values(delete.relation_id, old_tuple)?;

        self.build_record(
            relation,
            Operation::Delete,
            lsn,
            &old_values,
            Change::default(),
        )
    }

    /// Decodes a tuple whose values are required to build a record. Failures are errors.
    fn decode_new_values(
        &self,
        relation_id: RelationId,
        tuple: &Tuple,
    ) -> CdcResult<DecodedValues> {
        self.relations.decode(relation_id, tuple)
    }

    /// Decodes the before-image of an update.
    ///
    /// A missing or undecodable before-image only degrades the record, so failures are logged
    /// and reported as `None`.
    fn decode_old_values(
        &self,
        relation_id: RelationId,
        tuple: Option<&Tuple>,
    ) -> Option<DecodedValues> {
        let Some(tuple) = tuple else {
            trace!(%relation_id, "update message carries no old tuple");
            return None;
        };

        match self.relations.decode(relation_id, tuple) {
            Ok(values) => Some(values),
            Err(err) => {
                trace!(%relation_id, error = %err, "could not decode old tuple of update");
                None
            }
        }
    }

    fn build_record(
        &self,
        relation: &Relation,
        operation: Operation,
        lsn: PgLsn,
        key_source: &DecodedValues,
        payload: Change,
    ) -> CdcResult<Record> {
        Ok(Record {
            operation,
            position: encode_cdc_position(lsn)?,
            metadata: Metadata {
                collection: relation.name.clone(),
                schema: relation.namespace.clone(),
            },
            key: self.build_key(relation, key_source),
            payload,
        })
    }

    /// Copies the configured key column out of `values`.
    ///
    /// The key is empty when no key column is configured for the table or when the tuple does
    /// not contain it.
    fn build_key(&self, relation: &Relation, values: &DecodedValues) -> StructuredData {
        let mut key = StructuredData::new();

        let key_column = self
            .table_keys
            .get(&relation.name)
            .or_else(|| self.table_keys.get(&relation.qualified_name()));

        if let Some(key_column) = key_column
            && let Some(value) = values.get(key_column)
        {
            key.insert(key_column.clone(), value.clone());
        }

        key
    }

    /// Delivers `record` unless shutdown is signaled first.
    async fn send(&mut self, record: Record) -> CdcResult<()> {
        tokio::select! {
            biased;

            _ = self.shutdown_rx.wait() => {
                Err(cdc_error!(
                    ErrorKind::OperationCanceled,
                    "Record delivery canceled by shutdown"
                ))
            }
            result = self.records_tx.send(record) => {
                result.map_err(|_| cdc_error!(
                    ErrorKind::RecordChannelClosed,
                    "Record channel closed",
                    "the record consumer was dropped"
                ))
            }
        }
    }
}

/// An empty set of values is reported as an absent payload.
fn into_payload(values: DecodedValues) -> Option<StructuredData> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}
