use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "psync")]
#[command(about = "Scrape a profile listing and append new profiles to the configured sinks")]
struct Cli {
    /// Site variant; falls back to PSYNC_SITE.
    #[arg(long, global = true)]
    site: Option<String>,

    /// Print the run summary as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass (default).
    Sync,
    /// List known site variants.
    Sites,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            psync_cli::init_tracing();
            psync_cli::run_variant(cli.site.as_deref(), cli.json).await
        }
        Commands::Sites => {
            for site in psync_adapters::all_sites() {
                println!(
                    "{:<12} {:<14} {}",
                    site.site_id,
                    site.display_name,
                    site.default_listing_url.unwrap_or("(LISTING_URL required)")
                );
            }
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_flag_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["psync", "sync", "--site", "chatpia", "--json"]).unwrap();
        assert_eq!(cli.site.as_deref(), Some("chatpia"));
        assert!(cli.json);
        assert!(matches!(cli.command, Some(Commands::Sync)));
    }

    #[test]
    fn bare_invocation_defaults_to_sync() {
        let cli = Cli::try_parse_from(["psync"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.site.is_none());
    }
}
