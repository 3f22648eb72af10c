use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    psync_cli::init_tracing();
    psync_cli::run_variant(Some("live"), false).await
}
