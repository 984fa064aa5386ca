//! Configuration command.

use std::path::Path;
use tokio::runtime::Runtime;

use crate::config;

/// Print the config location and effective settings, optionally storing a
/// new default destination first
pub fn cmd_config(rt: &Runtime, set_destination: Option<&Path>) -> anyhow::Result<()> {
    let mut config = config::load();

    if let Some(dest) = set_destination {
        config.settings.destination = Some(dest.to_path_buf());
        rt.block_on(config::save_async(config.clone()))?;
        if config.settings.reachable_destination().is_none() {
            eprintln!("Warning: {} is not an existing directory", dest.display());
        }
    }

    match config::config_path() {
        Some(path) if path.exists() => println!("# {}", path.display()),
        Some(path) => println!("# {} (not created yet, showing defaults)", path.display()),
        None => println!("# no config directory available, showing defaults"),
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
