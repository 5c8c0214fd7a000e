//! prism-gateway: file lock operations tool.
//!
//! This is the main entry point for the `prism-gateway` CLI. It parses
//! arguments, loads the config, installs logging, dispatches to the
//! appropriate command handler, and maps errors to exit codes.

mod cli;
mod commands;

use anyhow::Context;
use cli::Cli;
use prism_gateway::config::{Config, LoggingSection};
use prism_gateway::exit_codes;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingSection) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(logging.level.as_str()))
        .context("invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to install tracing subscriber")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let config = match Config::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(err.exit_code() as u8);
        }
    };

    if let Err(err) = init_tracing(&config.logging) {
        eprintln!("Warning: {:#}", err);
    }

    match commands::dispatch(&config, cli.command).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            ExitCode::from(err.exit_code() as u8)
        }
    }
}
