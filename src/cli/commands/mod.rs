//! CLI command definitions and dispatch.
//!
//! Each subcommand lives in its own submodule:
//! - `scan`: scan a source and print the planned layout
//! - `import`: scan, then copy into the destination
//! - `config`: show or update the stored configuration

mod config;
mod import;
mod scan;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;

pub use config::cmd_config;
pub use import::cmd_import;
pub use scan::cmd_scan;

/// Media Import CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan a source folder and show where each file would go
    Scan {
        /// Card or folder to scan
        source: PathBuf,
        /// Destination root (defaults to the configured one)
        #[arg(short, long)]
        dest: Option<PathBuf>,
        #[command(flatten)]
        layout: LayoutArgs,
        /// Print the planned records as JSON
        #[arg(long)]
        json: bool,
        /// Skip preview generation
        #[arg(long)]
        no_thumbnails: bool,
    },
    /// Copy media from a source folder into the destination
    Import {
        /// Card or folder to import from
        source: PathBuf,
        /// Destination root directory
        #[arg(short, long)]
        dest: PathBuf,
        #[command(flatten)]
        layout: LayoutArgs,
        /// Remove source files once their copy is verified
        #[arg(long)]
        delete_originals: bool,
    },
    /// Show the config file location and effective settings
    Config {
        /// Store a new default destination
        #[arg(long)]
        set_destination: Option<PathBuf>,
    },
}

/// Overrides for how files are laid out under the destination.
#[derive(Args, Debug, Clone, Default)]
pub struct LayoutArgs {
    /// Sort into YYYY/MM folders by capture date
    #[arg(long, conflicts_with = "flat")]
    pub organize: bool,
    /// Place every file directly under the destination
    #[arg(long)]
    pub flat: bool,
    /// Rename files to their capture date (YYYYMMDD_HHMMSS)
    #[arg(long)]
    pub rename: bool,
}

impl LayoutArgs {
    /// Apply the flags that were given on top of stored settings.
    pub fn apply(&self, settings: &mut Settings) {
        if self.organize {
            settings.organize_by_date = true;
        }
        if self.flat {
            settings.organize_by_date = false;
        }
        if self.rename {
            settings.rename_by_date = true;
        }
    }
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;

    match &cli.command {
        Commands::Scan {
            source,
            dest,
            layout,
            json,
            no_thumbnails,
        } => cmd_scan(&rt, source, dest.as_deref(), layout, *json, !*no_thumbnails),
        Commands::Import {
            source,
            dest,
            layout,
            delete_originals,
        } => cmd_import(&rt, source, dest, layout, *delete_originals),
        Commands::Config { set_destination } => cmd_config(&rt, set_destination.as_deref()),
    }
}

/// A token that is cancelled on the first Ctrl-C. Must be called inside the runtime.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling...");
            token.cancel();
        }
    });
    cancel
}
