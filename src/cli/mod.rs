//! Command-line interface for media-import.
//!
//! Scans a card or folder, shows the planned layout and runs imports from
//! a terminal.

mod commands;

pub use commands::{Cli, Commands, LayoutArgs, run_command};
