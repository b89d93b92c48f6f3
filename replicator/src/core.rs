use std::io::Write;

use config::shared::{ReplicatorConfig, SourceConfig};
use logrepl::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use logrepl::replication::apply::start_apply_loop_with_acks;
use logrepl::replication::client::PgReplicationClient;
use logrepl::replication::endpoints::{cleanup, prepare};
use logrepl::replication::handler::CdcHandler;
use logrepl::replication::progress::{AckTx, create_ack_channel};
use logrepl::types::Record;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Drops the configured endpoints.
pub async fn run_cleanup(replicator_config: ReplicatorConfig) -> anyhow::Result<()> {
    let endpoint = &replicator_config.source.endpoint;
    endpoint.validate()?;

    cleanup(endpoint).await?;
    info!("cleanup finished");

    Ok(())
}

/// Creates the configured endpoints which do not exist yet.
pub async fn run_prepare(replicator_config: ReplicatorConfig) -> anyhow::Result<()> {
    let endpoint = &replicator_config.source.endpoint;
    endpoint.validate()?;

    prepare(endpoint).await?;
    info!("prepare finished");

    Ok(())
}

/// Streams records as JSON lines until Ctrl+C is received or the stream fails.
///
/// A record is acknowledged once written to stdout, so Postgres only releases WAL of records
/// which were printed.
pub async fn run_stream(replicator_config: ReplicatorConfig) -> anyhow::Result<()> {
    let source_config = replicator_config.source;
    source_config.validate()?;

    log_config(&source_config);

    let client = PgReplicationClient::connect(&source_config.endpoint).await?;

    let (records_tx, mut records_rx) = mpsc::channel(source_config.record_buffer_size);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let (ack_tx, ack_rx) = create_ack_channel();
    let handler = CdcHandler::new(
        source_config.table_keys.clone(),
        records_tx,
        shutdown_tx.subscribe(),
    );

    let apply_config = source_config.clone();
    let apply_handle = tokio::spawn(async move {
        start_apply_loop_with_acks(client, &apply_config, handler, shutdown_rx, ack_rx).await
    });

    let signal_handle = spawn_ctrl_c_listener(shutdown_tx.clone());

    // The channel closes once the apply loop has stopped and dropped the handler.
    let mut output_result = Ok(());
    while let Some(record) = records_rx.recv().await {
        if let Err(err) = write_record(&record, &ack_tx) {
            error!(error = %err, "failed to write record, shutting down");
            shutdown_tx.shutdown();
            output_result = Err(err);
            break;
        }
    }
    drop(records_rx);

    let apply_result = apply_handle.await?;
    signal_handle.abort();

    output_result?;
    apply_result?;

    info!("stream finished");

    Ok(())
}

fn write_record(record: &Record, ack_tx: &AckTx) -> anyhow::Result<()> {
    let line = serde_json::to_string(record)?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;

    ack_tx.acknowledge_record(record)?;

    Ok(())
}

fn spawn_ctrl_c_listener(shutdown_tx: ShutdownTx) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl+c: {err:?}");
            return;
        }

        info!("ctrl+c received, shutting down stream");
        shutdown_tx.shutdown();
    })
}

fn log_config(source_config: &SourceConfig) {
    let endpoint = &source_config.endpoint;
    info!(
        slot_name = ?endpoint.slot_name,
        publication_name = ?endpoint.publication_name,
        tables = ?endpoint.tables,
        tls_enabled = endpoint.tls.enabled,
        record_buffer_size = source_config.record_buffer_size,
        resume_position = ?source_config.position,
        "source config"
    );
}
