//! Scrape, dedup and append orchestration.

mod config;
mod engine;
mod pipeline;

pub use config::{
    SyncConfig, DEFAULT_APPEND_CHUNK, DEFAULT_DB_PORT, DEFAULT_DETAIL_DELAY_MS,
    DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_SSH_LOCAL_PORT, DEFAULT_SSH_PORT,
};
pub use engine::{SyncEngine, SyncOutcome};
pub use pipeline::{build_sinks, SinkWriteSummary, SyncPipeline, SyncRunSummary};

pub const CRATE_NAME: &str = "psync-sync";

/// Resolves configuration for `site` from the process environment and runs once.
pub async fn run_sync_once_from_env(
    site: Option<&str>,
) -> Result<SyncRunSummary, psync_core::SyncError> {
    let config = SyncConfig::from_env(site)?;
    let mut pipeline = SyncPipeline::new(config)?;
    pipeline.run_once().await
}
