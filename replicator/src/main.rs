//! Replicator binary.
//!
//! Manages the publication and replication slot of a Postgres source and streams its changes
//! to stdout as JSON lines.

use clap::{Parser, Subcommand};
use config::shared::ReplicatorConfig;
use config::{Environment, load_config};
use telemetry::tracing::init_tracing;

use crate::core::{run_cleanup, run_prepare, run_stream};

mod core;

#[derive(Parser)]
#[command(name = "replicator", about = "Postgres change data capture replicator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drop the configured publication and replication slot
    Cleanup,
    /// Create the configured publication and replication slot if they are missing
    Prepare,
    /// Stream change records to stdout until interrupted
    Stream,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let environment = Environment::load()?;
    let replicator_config: ReplicatorConfig = load_config()?;

    init_tracing(env!("CARGO_BIN_NAME"), environment)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args.command, replicator_config))
}

async fn async_main(command: Command, replicator_config: ReplicatorConfig) -> anyhow::Result<()> {
    match command {
        Command::Cleanup => run_cleanup(replicator_config).await,
        Command::Prepare => run_prepare(replicator_config).await,
        Command::Stream => run_stream(replicator_config).await,
    }
}
