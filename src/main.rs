//! spacewatch - space weather summaries in the terminal
//!
//! Fetches solar wind, geomagnetic, CME and flare data, merges it with a CME
//! prediction and local conditions, and prints the result as text or JSON.

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use spacewatch::cli::{self, Cli, CliError};
use spacewatch::config::AppConfig;
use spacewatch::logging::init_logging;

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::load(cli.config.as_deref())?;
    debug!(?config, "Loaded configuration");
    cli::run(cli, config).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
