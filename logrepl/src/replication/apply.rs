use config::shared::SourceConfig;
use futures::StreamExt;
use postgres_replication::protocol::{LogicalReplicationMessage, ReplicationMessage};
use std::pin::Pin;
use tokio::pin;
use tokio_postgres::types::PgLsn;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{CdcResult, ErrorKind};
use crate::replication::client::PgReplicationClient;
use crate::replication::handler::CdcHandler;
use crate::replication::message::LogicalMessage;
use crate::replication::position::{PositionToken, decode_cdc_position};
use crate::replication::progress::AckRx;
use crate::replication::stream::{EventsStream, StandbyProgress};
use crate::{bail, cdc_error};

/// Resolves the LSN streaming starts from.
///
/// A configured position token wins; otherwise streaming resumes from the confirmed flush
/// position of the slot.
pub async fn resolve_start_lsn(
    client: &PgReplicationClient,
    source_config: &SourceConfig,
    slot_name: &str,
) -> CdcResult<PgLsn> {
    if let Some(position) = &source_config.position {
        let start_lsn = decode_cdc_position(&PositionToken::new(position.clone()))?;
        info!(%start_lsn, "resuming from configured position");

        return Ok(start_lsn);
    }

    let slot = client.get_slot(slot_name).await?;
    info!(start_lsn = %slot.confirmed_flush_lsn, "resuming from slot position");

    Ok(slot.confirmed_flush_lsn)
}

/// Streams changes from the configured slot and publication into `handler` until shutdown.
///
/// Progress is reported to Postgres when it asks for it and once more when the loop stops.
/// The reported flush position is the last message whose record was accepted by the record
/// channel. Records still buffered in the channel are already confirmed, so a consumer that
/// fails before writing them loses them; use [`start_apply_loop_with_acks`] to confirm only
/// written records.
pub async fn start_apply_loop(
    client: PgReplicationClient,
    source_config: &SourceConfig,
    handler: CdcHandler,
    shutdown_rx: ShutdownRx,
) -> CdcResult<()> {
    run_apply_loop(client, source_config, handler, shutdown_rx, None).await
}

/// Like [`start_apply_loop`], but the reported flush position is the last position acknowledged
/// through the [`AckTx`](crate::replication::progress::AckTx) paired with `ack_rx`.
pub async fn start_apply_loop_with_acks(
    client: PgReplicationClient,
    source_config: &SourceConfig,
    handler: CdcHandler,
    shutdown_rx: ShutdownRx,
    ack_rx: AckRx,
) -> CdcResult<()> {
    run_apply_loop(client, source_config, handler, shutdown_rx, Some(ack_rx)).await
}

async fn run_apply_loop(
    client: PgReplicationClient,
    source_config: &SourceConfig,
    handler: CdcHandler,
    shutdown_rx: ShutdownRx,
    ack_rx: Option<AckRx>,
) -> CdcResult<()> {
    let (Some(slot_name), Some(publication_name)) = (
        source_config.endpoint.slot_name.as_deref(),
        source_config.endpoint.publication_name.as_deref(),
    ) else {
        bail!(
            ErrorKind::ConfigError,
            "Streaming requires a slot and a publication"
        );
    };

    let start_lsn = resolve_start_lsn(&client, source_config, slot_name).await?;

    let logical_replication_stream = client
        .start_logical_replication(publication_name, slot_name, start_lsn)
        .await?;

    let mut apply_loop = ApplyLoop {
        handler,
        shutdown_rx,
        ack_rx,
        start_lsn,
        last_received_lsn: start_lsn,
    };

    apply_loop
        .run(&client, EventsStream::wrap(logical_replication_stream))
        .await
}

/// Position confirmed to the server as flushed.
///
/// With acknowledgements it is the last acknowledged position, otherwise the last delivered one.
/// Before any record is confirmed it is the position streaming started from.
fn confirmed_lsn(
    start_lsn: PgLsn,
    delivered_lsn: Option<PgLsn>,
    ack_rx: Option<&AckRx>,
) -> PgLsn {
    let confirmed = match ack_rx {
        Some(ack_rx) => ack_rx.acknowledged_lsn(),
        None => delivered_lsn,
    };

    confirmed.unwrap_or(start_lsn)
}

struct ApplyLoop {
    handler: CdcHandler,
    shutdown_rx: ShutdownRx,
    ack_rx: Option<AckRx>,
    start_lsn: PgLsn,
    last_received_lsn: PgLsn,
}

impl ApplyLoop {
    fn progress(&self) -> StandbyProgress {
        StandbyProgress {
            received_lsn: self.last_received_lsn,
            confirmed_lsn: confirmed_lsn(
                self.start_lsn,
                self.handler.last_handled_lsn(),
                self.ack_rx.as_ref(),
            ),
        }
    }

    async fn run(
        &mut self,
        client: &PgReplicationClient,
        events_stream: EventsStream,
    ) -> CdcResult<()> {
        pin!(events_stream);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.wait() => {
                    info!("shutting down apply loop");
                    return self.report_final_progress(events_stream.as_mut()).await;
                }

                message = events_stream.next() => {
                    let Some(message) = message else {
                        if client.is_closed() {
                            warn!("replication stream ended due to closed postgres connection");
                            bail!(
                                ErrorKind::SourceConnectionFailed,
                                "PostgreSQL connection has been closed during the apply loop"
                            )
                        } else {
                            warn!("replication stream ended unexpectedly");
                            bail!(
                                ErrorKind::SourceConnectionFailed,
                                "Replication stream ended unexpectedly during the apply loop"
                            )
                        }
                    };

                    let result = self
                        .handle_replication_message(events_stream.as_mut(), message?)
                        .await;

                    match result {
                        Ok(()) => {}
                        Err(err) if err.kind() == ErrorKind::OperationCanceled => {
                            info!("record delivery interrupted by shutdown");
                            return self.report_final_progress(events_stream.as_mut()).await;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    async fn handle_replication_message(
        &mut self,
        events_stream: Pin<&mut EventsStream>,
        message: ReplicationMessage<LogicalReplicationMessage>,
    ) -> CdcResult<()> {
        match message {
            ReplicationMessage::XLogData(message) => {
                let lsn = PgLsn::from(message.wal_start());
                self.last_received_lsn = self.last_received_lsn.max(lsn);

                let logical_message = LogicalMessage::try_from(message.data()).map_err(|err| {
                    err.context("Replication message decoding failed", format!("lsn {lsn}"))
                })?;

                self.handler.handle(logical_message, lsn).await
            }
            ReplicationMessage::PrimaryKeepAlive(message) => {
                let wal_end = PgLsn::from(message.wal_end());
                self.last_received_lsn = self.last_received_lsn.max(wal_end);

                let reply_requested = message.reply() == 1;
                debug!(%wal_end, reply_requested, "received keep alive");

                events_stream
                    .report_progress(self.progress(), reply_requested)
                    .await
            }
            _ => Ok(()),
        }
    }

    async fn report_final_progress(
        &self,
        events_stream: Pin<&mut EventsStream>,
    ) -> CdcResult<()> {
        let progress = self.progress();
        events_stream
            .report_progress(progress, true)
            .await
            .map_err(|err| {
                cdc_error!(
                    ErrorKind::SourceConnectionFailed,
                    "Final status update failed",
                    format!("confirmed lsn {}", progress.confirmed_lsn),
                    source: err
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::progress::create_ack_channel;

    #[test]
    fn delivered_position_is_confirmed_without_acknowledgements() {
        let start = PgLsn::from(10);

        assert_eq!(confirmed_lsn(start, None, None), start);
        assert_eq!(
            confirmed_lsn(start, Some(PgLsn::from(40)), None),
            PgLsn::from(40)
        );
    }

    #[test]
    fn only_acknowledged_position_is_confirmed_with_acknowledgements() {
        let start = PgLsn::from(10);
        let (ack_tx, ack_rx) = create_ack_channel();

        // Delivered but not yet written by the consumer.
        assert_eq!(
            confirmed_lsn(start, Some(PgLsn::from(40)), Some(&ack_rx)),
            start
        );

        ack_tx.acknowledge(PgLsn::from(20));
        assert_eq!(
            confirmed_lsn(start, Some(PgLsn::from(40)), Some(&ack_rx)),
            PgLsn::from(20)
        );
    }
}
