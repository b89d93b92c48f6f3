//! Acknowledgements of records the consumer has durably processed.
//!
//! By default the apply loop confirms a position to the server as soon as its record was
//! accepted by the record channel. A consumer which must not lose buffered records instead
//! acknowledges each record once written, and only acknowledged positions are confirmed.

use tokio::sync::watch;
use tokio_postgres::types::PgLsn;

use crate::error::CdcResult;
use crate::replication::position::decode_cdc_position;
use crate::types::Record;

/// Consumer side of the acknowledgement channel.
#[derive(Debug, Clone)]
pub struct AckTx(watch::Sender<Option<PgLsn>>);

impl AckTx {
    /// Acknowledges every record up to and including `lsn`.
    ///
    /// Acknowledgements never move backwards.
    pub fn acknowledge(&self, lsn: PgLsn) {
        self.0.send_if_modified(|acknowledged| match acknowledged {
            Some(current) if *current >= lsn => false,
            _ => {
                *acknowledged = Some(lsn);
                true
            }
        });
    }

    /// Acknowledges `record` and every record delivered before it.
    pub fn acknowledge_record(&self, record: &Record) -> CdcResult<()> {
        self.acknowledge(decode_cdc_position(&record.position)?);

        Ok(())
    }
}

/// Apply loop side of the acknowledgement channel.
#[derive(Debug, Clone)]
pub struct AckRx(watch::Receiver<Option<PgLsn>>);

impl AckRx {
    /// Highest acknowledged position, if any record was acknowledged yet.
    pub fn acknowledged_lsn(&self) -> Option<PgLsn> {
        *self.0.borrow()
    }
}

pub fn create_ack_channel() -> (AckTx, AckRx) {
    let (tx, rx) = watch::channel(None);
    (AckTx(tx), AckRx(rx))
}
