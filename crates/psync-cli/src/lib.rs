//! Shared entry point for the `psync` binary and the per-site wrappers.

use std::{path::Path, process::ExitCode};

use psync_core::SyncError;
use psync_sync::SyncRunSummary;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const CRATE_NAME: &str = "psync-cli";

const DEFAULT_FILTER: &str = "info,sqlx=warn,headless_chrome=warn";

/// `RUST_LOG` directives, read after `.env` (or `dotenv_path`) is loaded so a
/// value set there applies. Variables already in the environment win.
fn load_filter(dotenv_path: Option<&Path>) -> EnvFilter {
    let _ = match dotenv_path {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Logs go to stderr so stdout carries only the run summary.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(load_filter(None))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Process exit status for a finished run.
pub fn exit_status(result: &Result<SyncRunSummary, SyncError>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(err) => err.exit_code(),
    }
}

pub fn report(result: &Result<SyncRunSummary, SyncError>, json: bool) {
    match result {
        Ok(summary) if json => match serde_json::to_string_pretty(summary) {
            Ok(body) => println!("{body}"),
            Err(err) => eprintln!("summary not serializable: {err}"),
        },
        Ok(summary) => println!("sync complete: {}", summary.summary_line()),
        Err(err) => eprintln!("sync failed: {err:#}"),
    }
}

/// Runs one sync for `site` with configuration from the environment.
pub async fn run_variant(site: Option<&str>, json: bool) -> ExitCode {
    let result = psync_sync::run_sync_once_from_env(site).await;
    report(&result, json);
    ExitCode::from(exit_status(&result))
}
