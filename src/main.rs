//! Media Import command-line entry point.

use clap::Parser;
use media_import::cli;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Used when `RUST_LOG` is unset. Components log under short targets.
const DEFAULT_LOG_FILTER: &str =
    "warn,media_import=info,scanner=info,metadata=info,import=info,recalc=info,planner=info,thumbnail=info";

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr so `scan --json` output stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli::run_command(&args)
}
