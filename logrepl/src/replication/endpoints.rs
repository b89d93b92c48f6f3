//! Lifecycle of the replication endpoints a streaming session depends on.
//!
//! A session needs a publication, which selects the tables to stream, and a logical replication
//! slot, which retains the WAL the session has not confirmed yet. Both are plain server-side
//! objects that are created before streaming and dropped once the session is retired.
//!
//! Dropping the two objects is deliberately asymmetric. A missing publication is skipped by
//! [`cleanup_endpoints`], while a missing slot is always reported: the slot is what retains WAL
//! on the server, so failing to find it is something the operator has to know about.

use config::shared::EndpointConfig;
use pg_escape::quote_identifier;
use std::future::Future;
use tokio_postgres::types::PgLsn;
use tracing::{info, warn};

use crate::bail;
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::replication::client::PgReplicationClient;

/// Result returned when creating a new replication slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSlotResult {
    /// The LSN from which the slot guarantees to stream changes.
    pub consistent_point: PgLsn,
}

/// Options used to create a publication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationOptions {
    /// Tables covered by the publication, as SQL identifiers (`users`, `inventory.items`,
    /// `"MyTable"`). Entries are used as written, so unquoted names are case folded and bare
    /// names resolve through the server's `search_path`.
    pub tables: Vec<String>,
    /// Raw `key = value` parameters for the `with (...)` clause.
    pub publication_params: Vec<String>,
}

impl PublicationOptions {
    pub fn new(tables: Vec<String>, publication_params: Vec<String>) -> Self {
        Self {
            tables,
            publication_params,
        }
    }

    /// Builds the `create publication` statement for `name`.
    ///
    /// Fails with [`ErrorKind::ConfigError`] when no table is listed, before anything is sent to
    /// the server.
    pub fn create_query(&self, name: &str) -> CdcResult<String> {
        if self.tables.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Publication has no tables",
                format!("publication {name} must cover at least one table")
            );
        }

        let mut tables = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let table = table.trim();
            if table.is_empty() {
                bail!(
                    ErrorKind::ConfigError,
                    "Publication table name is empty",
                    format!("publication {name} lists an empty table name")
                );
            }
            tables.push(table);
        }

        let mut query = format!(
            "create publication {} for table {}",
            quote_identifier(name),
            tables.join(", ")
        );

        if !self.publication_params.is_empty() {
            query.push_str(&format!(" with ({})", self.publication_params.join(", ")));
        }

        Ok(query)
    }
}

/// Options used to drop a publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropPublicationOptions {
    /// Treat a missing publication as already dropped.
    pub if_exists: bool,
}

impl DropPublicationOptions {
    pub fn drop_query(&self, name: &str) -> String {
        let if_exists = if self.if_exists { "if exists " } else { "" };
        format!("drop publication {if_exists}{}", quote_identifier(name))
    }
}

/// Server-side objects needed for logical replication.
///
/// Implementations report missing and duplicate objects with the dedicated error kinds:
/// [`ErrorKind::PublicationNotFound`], [`ErrorKind::PublicationAlreadyExists`],
/// [`ErrorKind::ReplicationSlotNotFound`] and [`ErrorKind::ReplicationSlotAlreadyExists`].
pub trait ReplicationEndpoints {
    /// Creates publication `name` over `options.tables`.
    fn create_publication(
        &self,
        name: &str,
        options: &PublicationOptions,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    /// Drops publication `name`. A missing publication is only an error without
    /// [`DropPublicationOptions::if_exists`].
    fn drop_publication(
        &self,
        name: &str,
        options: DropPublicationOptions,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    fn publication_exists(&self, name: &str) -> impl Future<Output = CdcResult<bool>> + Send;

    /// Creates logical replication slot `name` using the `pgoutput` plugin.
    fn create_slot(&self, name: &str)
    -> impl Future<Output = CdcResult<CreateSlotResult>> + Send;

    /// Drops replication slot `name`. There is no lenient variant: a missing slot is always an
    /// error.
    fn delete_slot(&self, name: &str) -> impl Future<Output = CdcResult<()>> + Send;

    fn slot_exists(&self, name: &str) -> impl Future<Output = CdcResult<bool>> + Send;
}

// Replication commands are kept in uppercase, the replication command lexer of Postgres does not
// accept them in lowercase.

/// Builds the replication command creating logical slot `name` without exporting a snapshot.
pub fn create_slot_query(name: &str) -> String {
    format!(
        "CREATE_REPLICATION_SLOT {} LOGICAL pgoutput NOEXPORT_SNAPSHOT",
        quote_identifier(name)
    )
}

/// Builds the replication command dropping slot `name`, waiting for it to become inactive.
pub fn drop_slot_query(name: &str) -> String {
    format!("DROP_REPLICATION_SLOT {} WAIT", quote_identifier(name))
}

/// Error detail used when a replication slot to drop does not exist.
pub fn slot_not_found_detail(slot_name: &str) -> String {
    format!(r#"replication slot "{slot_name}" does not exist"#)
}

/// Error detail used when a publication to drop does not exist.
pub fn publication_not_found_detail(publication_name: &str) -> String {
    format!(r#"publication "{publication_name}" does not exist"#)
}

/// Drops the endpoints named in `config`.
///
/// The publication, when configured, is dropped first and only if it exists, so a missing
/// publication never fails the cleanup. The slot, when configured, is dropped next and strictly:
/// a missing slot fails the cleanup with [`ErrorKind::ReplicationSlotNotFound`]. The slot is
/// dropped even if dropping the publication failed, and all failures are returned together.
/// Nothing happens when neither endpoint is configured.
pub async fn cleanup_endpoints<E>(endpoints: &E, config: &EndpointConfig) -> CdcResult<()>
where
    E: ReplicationEndpoints,
{
    let mut errors: Vec<CdcError> = Vec::new();

    if let Some(publication_name) = &config.publication_name {
        info!(publication_name, "dropping publication");

        let options = DropPublicationOptions { if_exists: true };
        if let Err(err) = endpoints.drop_publication(publication_name, options).await {
            errors.push(err.context(
                "Publication cleanup failed",
                format!("drop publication {publication_name}"),
            ));
        }
    }

    if let Some(slot_name) = &config.slot_name {
        info!(slot_name, "dropping replication slot");

        if let Err(err) = endpoints.delete_slot(slot_name).await {
            errors.push(err.context(
                "Replication slot cleanup failed",
                format!("drop replication slot {slot_name}"),
            ));
        }
    }

    if errors.is_empty() {
        return Ok(());
    }

    Err(errors.into())
}

/// Creates the endpoints named in `config` which do not exist yet.
///
/// The publication is created before the slot so that the slot's starting point already covers
/// the published tables.
pub async fn prepare_endpoints<E>(endpoints: &E, config: &EndpointConfig) -> CdcResult<()>
where
    E: ReplicationEndpoints,
{
    if let Some(publication_name) = &config.publication_name {
        if endpoints.publication_exists(publication_name).await? {
            info!(publication_name, "using existing publication");
        } else {
            let options = PublicationOptions::new(
                config.tables.clone(),
                config.publication_params.clone(),
            );
            endpoints
                .create_publication(publication_name, &options)
                .await?;
        }
    }

    if let Some(slot_name) = &config.slot_name {
        if endpoints.slot_exists(slot_name).await? {
            info!(slot_name, "using existing replication slot");
        } else {
            let slot = endpoints.create_slot(slot_name).await?;
            info!(
                slot_name,
                consistent_point = %slot.consistent_point,
                "created replication slot"
            );
        }
    }

    Ok(())
}

/// Connects with `config` and drops its endpoints, see [`cleanup_endpoints`].
pub async fn cleanup(config: &EndpointConfig) -> CdcResult<()> {
    if config.publication_name.is_none() && config.slot_name.is_none() {
        warn!("no publication or replication slot configured, nothing to clean up");
        return Ok(());
    }

    let client = PgReplicationClient::connect(config).await?;
    cleanup_endpoints(&client, config).await
}

/// Connects with `config` and creates its missing endpoints, see [`prepare_endpoints`].
pub async fn prepare(config: &EndpointConfig) -> CdcResult<()> {
    let client = PgReplicationClient::connect(config).await?;
    prepare_endpoints(&client, config).await
}
