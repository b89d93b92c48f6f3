use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_postgres::types::PgLsn;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::replication::endpoints::{
    CreateSlotResult, DropPublicationOptions, PublicationOptions, ReplicationEndpoints,
    create_slot_query, drop_slot_query, publication_not_found_detail, slot_not_found_detail,
};

#[derive(Debug, Default)]
struct Inner {
    publications: HashSet<String>,
    slots: HashSet<String>,
    /// Statements that would have been sent to Postgres, in order.
    statements: Vec<String>,
    failing_publication_drops: HashSet<String>,
    next_lsn: u64,
}

/// In-memory [`ReplicationEndpoints`] reproducing the behavior and error texts of Postgres.
///
/// Only statements which would reach the server are recorded, existence checks are not.
#[derive(Debug, Clone, Default)]
pub struct MemoryEndpoints {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory endpoints lock poisoned")
    }

    /// Registers an existing publication without recording a statement.
    pub fn add_publication(&self, name: &str) {
        self.lock().publications.insert(name.to_string());
    }

    /// Registers an existing slot without recording a statement.
    pub fn add_slot(&self, name: &str) {
        self.lock().slots.insert(name.to_string());
    }

    /// Makes every drop of publication `name` fail with a generic query error.
    pub fn fail_publication_drops(&self, name: &str) {
        self.lock()
            .failing_publication_drops
            .insert(name.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn statement_count(&self) -> usize {
        self.lock().statements.len()
    }
}

impl ReplicationEndpoints for MemoryEndpoints {
    async fn create_publication(&self, name: &str, options: &PublicationOptions) -> CdcResult<()> {
        let query = options.create_query(name)?;

        let mut inner = self.lock();
        inner.statements.push(query);

        if !inner.publications.insert(name.to_string()) {
            bail!(
                ErrorKind::PublicationAlreadyExists,
                "Publication already exists",
                format!(r#"publication "{name}" already exists"#)
            );
        }

        Ok(())
    }

    async fn drop_publication(&self, name: &str, options: DropPublicationOptions) -> CdcResult<()> {
        let mut inner = self.lock();
        inner.statements.push(options.drop_query(name));

        if inner.failing_publication_drops.contains(name) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "PostgreSQL error",
                format!("simulated failure dropping publication {name}")
            );
        }

        if !inner.publications.remove(name) && !options.if_exists {
            bail!(
                ErrorKind::PublicationNotFound,
                "Publication not found",
                publication_not_found_detail(name)
            );
        }

        Ok(())
    }

    async fn publication_exists(&self, name: &str) -> CdcResult<bool> {
        Ok(self.lock().publications.contains(name))
    }

    async fn create_slot(&self, name: &str) -> CdcResult<CreateSlotResult> {
        let mut inner = self.lock();
        inner.statements.push(create_slot_query(name));

        if !inner.slots.insert(name.to_string()) {
            bail!(
                ErrorKind::ReplicationSlotAlreadyExists,
                "Replication slot already exists",
                format!(r#"replication slot "{name}" already exists"#)
            );
        }

        inner.next_lsn += 0x100;

        Ok(CreateSlotResult {
            consistent_point: PgLsn::from(inner.next_lsn),
        })
    }

    async fn delete_slot(&self, name: &str) -> CdcResult<()> {
        let mut inner = self.lock();
        inner.statements.push(drop_slot_query(name));

        if !inner.slots.remove(name) {
            bail!(
                ErrorKind::ReplicationSlotNotFound,
                "Replication slot not found",
                slot_not_found_detail(name)
            );
        }

        Ok(())
    }

    async fn slot_exists(&self, name: &str) -> CdcResult<bool> {
        Ok(self.lock().slots.contains(name))
    }
}
