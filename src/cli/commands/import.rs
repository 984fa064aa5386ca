//! Import command: scan, then copy.

use futures::StreamExt;
use std::path::Path;
use tokio::runtime::Runtime;

use super::scan::print_plan;
use super::{LayoutArgs, cancel_on_interrupt};
use crate::config::{self, Config, Settings};
use crate::import::{ImportEngine, ImportEvent, ImportOutcome};
use crate::model::{ImportStatus, MediaFile};
use crate::scanner::Scanner;

/// Import everything new from `source` into `dest`
pub fn cmd_import(
    rt: &Runtime,
    source: &Path,
    dest: &Path,
    layout: &LayoutArgs,
    delete_originals: bool,
) -> anyhow::Result<()> {
    let config = config::load();
    let mut settings = config.settings.clone();
    settings.destination = Some(dest.to_path_buf());
    settings.delete_originals |= delete_originals;
    layout.apply(&mut settings);

    if settings.reachable_destination().is_none() {
        anyhow::bail!("destination {} is not a usable directory", dest.display());
    }

    rt.block_on(import_source(source, dest, &config, settings))
}

async fn import_source(
    source: &Path,
    dest: &Path,
    config: &Config,
    settings: Settings,
) -> anyhow::Result<()> {
    let cancel = cancel_on_interrupt();

    println!("Scanning {}", source.display());
    let Some(files) = Scanner::new(config.scan.clone())
        .scan_to_end(source.to_path_buf(), settings.clone(), cancel.clone())
        .await
    else {
        anyhow::bail!("scan cancelled");
    };
    print_plan(&files);

    let pending = files.iter().filter(|f| f.status == ImportStatus::Waiting).count();
    if pending == 0 {
        println!("Nothing new to import.");
        return Ok(());
    }
    if settings.delete_originals {
        println!("Originals will be deleted after each verified copy.");
    }
    println!("\nImporting {pending} files into {}", dest.display());

    let engine = ImportEngine::new(config.import.clone());
    let stream = engine.import(files, &settings, cancel)?;
    let mut stream = std::pin::pin!(stream);

    while let Some(event) = stream.next().await {
        match event {
            ImportEvent::File(update) => {
                if update.file.status.is_terminal() {
                    let progress = update.progress;
                    println!(
                        "[{}/{} {:>3.0}%] {}",
                        progress.files_processed,
                        progress.files_total,
                        progress.fraction() * 100.0,
                        describe(&update.file)
                    );
                }
            }
            ImportEvent::Finished(summary) => {
                println!(
                    "\nImported {}, failed {}, warnings {}, not started {}",
                    summary.imported, summary.failed, summary.warnings, summary.not_started
                );
                return match summary.outcome() {
                    ImportOutcome::Completed | ImportOutcome::CompletedWithWarnings => Ok(()),
                    ImportOutcome::CompletedWithFailures => {
                        anyhow::bail!("{} files failed to import", summary.failed)
                    }
                    ImportOutcome::Cancelled => anyhow::bail!("import cancelled"),
                };
            }
        }
    }
    anyhow::bail!("import ended unexpectedly")
}

fn describe(file: &MediaFile) -> String {
    let dest = file
        .dest_path
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    match (&file.status, &file.import_error) {
        (ImportStatus::Failed, Some(reason)) => format!("FAILED {}: {reason}", file.source_path.display()),
        (_, Some(note)) => format!("{} -> {dest} ({note})", file.source_path.display()),
        _ => format!("{} -> {dest}", file.source_path.display()),
    }
}
