//! Append-only destinations for sync batches: spreadsheet, relational mirror,
//! HTTP ingestion API, plus the SSH tunnel the mirror may ride on.

use async_trait::async_trait;
use psync_core::{ExistingKeySet, ProfileRecord, RecordSchema};
use thiserror::Error;

mod api;
mod mirror;
mod sheets;
mod tunnel;

pub use api::{ApiSink, ApiSinkConfig};
pub use mirror::{MysqlConfig, MysqlMirror};
pub use sheets::{
    column_letter, ServiceAccountKey, SheetCredentials, SheetsConfig, SheetsSink, SHEETS_API_BASE,
};
pub use tunnel::{SshTunnel, SshTunnelConfig};

pub const CRATE_NAME: &str = "psync-sinks";

/// A write that stopped after `written` rows had been durably accepted.
#[derive(Debug, Error)]
#[error("write stopped after {written} row(s): {source:#}")]
pub struct PartialWrite {
    pub written: usize,
    #[source]
    pub source: anyhow::Error,
}

impl PartialWrite {
    pub fn new(written: usize, source: anyhow::Error) -> Self {
        Self { written, source }
    }
}

#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> &str;

    /// Identifiers already held by the sink. `None` when the sink cannot be
    /// enumerated; such a sink takes no part in the run's snapshot.
    async fn load_keys(&mut self) -> anyhow::Result<Option<ExistingKeySet>>;

    /// Appends `records` in the given order and returns the number written.
    async fn write(
        &mut self,
        schema: &RecordSchema,
        records: &[&ProfileRecord],
    ) -> Result<usize, PartialWrite>;

    /// Releases connections and child processes. Called once at run end.
    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
