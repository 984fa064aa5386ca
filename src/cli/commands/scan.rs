//! Source scanning command.

use futures::StreamExt;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tokio::runtime::Runtime;

use super::{LayoutArgs, cancel_on_interrupt};
use crate::config::{self, Config, Settings};
use crate::model::MediaFile;
use crate::scanner::{ScanEvent, Scanner};
use crate::thumbnail::ThumbnailCache;

/// Scan a source folder and print the plan
pub fn cmd_scan(
    rt: &Runtime,
    source: &Path,
    dest: Option<&Path>,
    layout: &LayoutArgs,
    json: bool,
    thumbnails: bool,
) -> anyhow::Result<()> {
    let config = config::load();
    let mut settings = config.settings.clone();
    if let Some(dest) = dest {
        settings.destination = Some(dest.to_path_buf());
    }
    layout.apply(&mut settings);

    rt.block_on(scan_source(source, &config, settings, json, thumbnails))
}

async fn scan_source(
    source: &Path,
    config: &Config,
    settings: Settings,
    json: bool,
    thumbnails: bool,
) -> anyhow::Result<()> {
    let cancel = cancel_on_interrupt();
    let mut scanner = Scanner::new(config.scan.clone());
    if thumbnails && config.thumbnails.enabled {
        let cache = ThumbnailCache::from_config(&config.thumbnails);
        scanner = scanner.with_thumbnails(cache, config.thumbnails.size);
    }

    if !json {
        println!("Scanning {}", source.display());
    }
    let stream = scanner.scan(source.to_path_buf(), settings.clone(), cancel);
    let mut stream = std::pin::pin!(stream);
    let mut total = 0;
    let mut enriched = 0;

    while let Some(event) = stream.next().await {
        match event {
            ScanEvent::Discovered(files) => total = files.len(),
            ScanEvent::Enriched(_) => {
                enriched += 1;
                if !json && enriched % 50 == 0 {
                    print!("\rRead {enriched}/{total} files...");
                    std::io::stdout().flush()?;
                }
            }
            ScanEvent::Finished(files) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&files)?);
                } else {
                    if settings.reachable_destination().is_none() {
                        println!("\nNo usable destination; showing files only.");
                    }
                    print_plan(&files);
                }
                return Ok(());
            }
            ScanEvent::Cancelled => anyhow::bail!("scan cancelled"),
        }
    }
    anyhow::bail!("scan ended unexpectedly")
}

/// Print one line per file followed by per-status totals.
pub(super) fn print_plan(files: &[MediaFile]) {
    println!();
    for file in files {
        let target = match (&file.dest_path, &file.duplicate_of) {
            (Some(dest), _) => dest.display().to_string(),
            (None, Some(original)) => format!("same as {}", original.display()),
            (None, None) => "-".to_string(),
        };
        let preview = if file.thumbnail.is_some() { "*" } else { " " };
        println!(
            "{:<17}{} {} -> {}",
            file.status.label(),
            preview,
            file.source_path.display(),
            target
        );
    }

    let mut totals: BTreeMap<&'static str, usize> = BTreeMap::new();
    for file in files {
        *totals.entry(file.status.label()).or_default() += 1;
    }
    let totals: Vec<String> = totals
        .into_iter()
        .map(|(label, count)| format!("{count} {label}"))
        .collect();
    println!("\n{} files: {}", files.len(), totals.join(", "));
}
