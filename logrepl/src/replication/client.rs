use config::shared::{EndpointConfig, TlsConfig};
use pg_escape::quote_literal;
use postgres_replication::LogicalReplicationStream;
use rustls::ClientConfig;
use secrecy::ExposeSecret;
use std::fmt;
use std::io::BufReader;
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{
    Client, Config, Connection, NoTls, SimpleQueryMessage, SimpleQueryRow, Socket,
    config::ReplicationMode, types::PgLsn,
};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, error, info, warn};

use crate::error::{CdcResult, ErrorKind};
use crate::replication::endpoints::{
    CreateSlotResult, DropPublicationOptions, PublicationOptions, ReplicationEndpoints,
    create_slot_query, drop_slot_query, publication_not_found_detail, slot_not_found_detail,
};
use crate::{bail, cdc_error};

/// Spawns a background task to monitor a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        let result = connection.await;

        match result {
            Err(err) => error!("an error occurred during the postgres connection: {}", err),
            Ok(()) => info!("postgres connection terminated successfully"),
        }
    }
    .instrument(span);

    // The connection is closed when the `Client` is dropped, so the handle is not kept.
    tokio::spawn(task);
}

/// Slot state read from `pg_replication_slots`.
#[derive(Debug, Clone)]
pub struct GetSlotResult {
    /// The LSN up to which the consumer of the slot confirmed changes.
    pub confirmed_flush_lsn: PgLsn,
}

/// A client for Postgres's logical replication features.
///
/// The connection is opened in logical replication mode, which accepts both replication commands
/// and plain SQL, so the same client manages the endpoints and streams changes.
#[derive(Debug, Clone)]
pub struct PgReplicationClient {
    client: Arc<Client>,
}

impl PgReplicationClient {
    /// Establishes a connection to the database named by `config.connection_url`. The connection
    /// uses TLS if enabled in the config.
    pub async fn connect(config: &EndpointConfig) -> CdcResult<Self> {
        let mut pg_config: Config = config
            .connection_url
            .expose_secret()
            .parse()
            .map_err(|err: tokio_postgres::Error| {
                cdc_error!(
                    ErrorKind::ConfigError,
                    "Connection url is invalid",
                    err.to_string(),
                    source: err
                )
            })?;
        pg_config.replication_mode(ReplicationMode::Logical);

        match config.tls.enabled {
            true => PgReplicationClient::connect_tls(pg_config, &config.tls).await,
            false => PgReplicationClient::connect_no_tls(pg_config).await,
        }
    }

    async fn connect_no_tls(config: Config) -> CdcResult<Self> {
        let (client, connection) = config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);

        info!("successfully connected to postgres without tls");

        Ok(PgReplicationClient {
            client: Arc::new(client),
        })
    }

    async fn connect_tls(config: Config, tls: &TlsConfig) -> CdcResult<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader = BufReader::new(tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            let cert = cert?;
            root_store.add(cert)?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
        spawn_postgres_connection::<MakeRustlsConnect>(connection);

        info!("successfully connected to postgres with tls");

        Ok(PgReplicationClient {
            client: Arc::new(client),
        })
    }

    /// Checks if the underlying connection is closed.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Gets the slot by `slot_name`.
    ///
    /// Returns an error in case of failure or missing slot.
    pub async fn get_slot(&self, slot_name: &str) -> CdcResult<GetSlotResult> {
        let query = format!(
            r#"select confirmed_flush_lsn from pg_replication_slots where slot_name = {};"#,
            quote_literal(slot_name)
        );

        let results = self.client.simple_query(&query).await?;
        for result in results {
            if let SimpleQueryMessage::Row(row) = result {
                let confirmed_flush_lsn = Self::get_row_value::<PgLsn>(
                    &row,
                    "confirmed_flush_lsn",
                    "pg_replication_slots",
                )?;

                return Ok(GetSlotResult {
                    confirmed_flush_lsn,
                });
            }
        }

        bail!(
            ErrorKind::ReplicationSlotNotFound,
            "Replication slot not found",
            slot_not_found_detail(slot_name)
        );
    }

    /// Starts a logical replication stream from the specified publication and slot.
    ///
    /// The stream will begin reading changes from the provided `start_lsn`.
    pub async fn start_logical_replication(
        &self,
        publication_name: &str,
        slot_name: &str,
        start_lsn: PgLsn,
    ) -> CdcResult<LogicalReplicationStream> {
        info!(
            publication_name,
            slot_name,
            %start_lsn,
            "starting logical replication"
        );

        let options = format!(
            r#"("proto_version" '1', "publication_names" {})"#,
            quote_literal(pg_escape::quote_identifier(publication_name).as_ref())
        );

        let query = format!(
            r#"START_REPLICATION SLOT {} LOGICAL {} {}"#,
            pg_escape::quote_identifier(slot_name),
            start_lsn,
            options
        );

        let copy_stream = self.client.copy_both_simple::<bytes::Bytes>(&query).await?;
        let stream = LogicalReplicationStream::new(copy_stream);

        Ok(stream)
    }

    /// Runs `query` and reports whether it returned at least one row.
    async fn has_rows(&self, query: &str) -> CdcResult<bool> {
        for message in self.client.simple_query(query).await? {
            if let SimpleQueryMessage::Row(_) = message {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Extracts and parses the value of `column_name` from a simple query row.
    fn get_row_value<T: std::str::FromStr>(
        row: &SimpleQueryRow,
        column_name: &str,
        table_name: &str,
    ) -> CdcResult<T>
    where
        T::Err: fmt::Debug,
    {
        let value = row.try_get(column_name)?.ok_or(cdc_error!(
            ErrorKind::InvalidData,
            "Column not found in source table",
            format!("Column '{column_name}' not found in table '{table_name}'")
        ))?;

        value.parse().map_err(|e: T::Err| {
            cdc_error!(
                ErrorKind::ConversionError,
                "Column parsing failed",
                format!(
                    "Failed to parse value from column '{column_name}' in table '{table_name}': {e:?}"
                )
            )
        })
    }
}

impl ReplicationEndpoints for PgReplicationClient {
    async fn create_publication(&self, name: &str, options: &PublicationOptions) -> CdcResult<()> {
        let query = options.create_query(name)?;

        match self.client.simple_query(&query).await {
            Ok(_) => {
                info!(publication_name = name, tables = ?options.tables, "created publication");

                Ok(())
            }
            Err(err) => {
                if let Some(code) = err.code()
                    && *code == SqlState::DUPLICATE_OBJECT
                {
                    bail!(
                        ErrorKind::PublicationAlreadyExists,
                        "Publication already exists",
                        format!(r#"publication "{name}" already exists"#),
                        source: err
                    );
                }

                error!(publication_name = name, error = %err, "failed to create publication");

                Err(err.into())
            }
        }
    }

    async fn drop_publication(&self, name: &str, options: DropPublicationOptions) -> CdcResult<()> {
        let query = options.drop_query(name);

        match self.client.simple_query(&query).await {
            Ok(_) => {
                info!(publication_name = name, "dropped publication");

                Ok(())
            }
            Err(err) => {
                if let Some(code) = err.code()
                    && *code == SqlState::UNDEFINED_OBJECT
                {
                    bail!(
                        ErrorKind::PublicationNotFound,
                        "Publication not found",
                        publication_not_found_detail(name),
                        source: err
                    );
                }

                error!(publication_name = name, error = %err, "failed to drop publication");

                Err(err.into())
            }
        }
    }

    async fn publication_exists(&self, name: &str) -> CdcResult<bool> {
        let query = format!(
            "select 1 as exists from pg_publication where pubname = {};",
            quote_literal(name)
        );

        self.has_rows(&query).await
    }

    async fn create_slot(&self, name: &str) -> CdcResult<CreateSlotResult> {
        let query = create_slot_query(name);

        match self.client.simple_query(&query).await {
            Ok(results) => {
                for result in results {
                    if let SimpleQueryMessage::Row(row) = result {
                        let consistent_point = Self::get_row_value::<PgLsn>(
                            &row,
                            "consistent_point",
                            "pg_replication_slots",
                        )?;

                        return Ok(CreateSlotResult { consistent_point });
                    }
                }
            }
            Err(err) => {
                if let Some(code) = err.code()
                    && *code == SqlState::DUPLICATE_OBJECT
                {
                    bail!(
                        ErrorKind::ReplicationSlotAlreadyExists,
                        "Replication slot already exists",
                        format!(r#"replication slot "{name}" already exists"#),
                        source: err
                    );
                }

                return Err(err.into());
            }
        }

        Err(cdc_error!(
            ErrorKind::ReplicationSlotNotCreated,
            "Replication slot creation failed",
            format!("creating replication slot {name} returned no consistent point")
        ))
    }

    async fn delete_slot(&self, name: &str) -> CdcResult<()> {
        let query = drop_slot_query(name);

        match self.client.simple_query(&query).await {
            Ok(_) => {
                info!(slot_name = name, "dropped replication slot");

                Ok(())
            }
            Err(err) => {
                if let Some(code) = err.code()
                    && *code == SqlState::UNDEFINED_OBJECT
                {
                    warn!(slot_name = name, "attempted to drop non-existent replication slot");

                    bail!(
                        ErrorKind::ReplicationSlotNotFound,
                        "Replication slot not found",
                        slot_not_found_detail(name),
                        source: err
                    );
                }

                error!(slot_name = name, error = %err, "failed to drop replication slot");

                Err(err.into())
            }
        }
    }

    async fn slot_exists(&self, name: &str) -> CdcResult<bool> {
        let query = format!(
            "select 1 as exists from pg_replication_slots where slot_name = {};",
            quote_literal(name)
        );

        self.has_rows(&query).await
    }
}
