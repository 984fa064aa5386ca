//! Import pipeline: copy, verify, finalize.
//!
//! Executes a planned batch. Every `Waiting` file with a destination goes
//! through:
//!
//! 1. **Copy** into a newly created file (existing files are never
//!    overwritten)
//! 2. **Verify** the destination size against the recorded size
//! 3. **Finalize**: preserve timestamps, bring sidecars along, and
//!    optionally delete the originals
//!
//! Failures are isolated per file. A failed deletion or a sidecar left
//! behind only annotates the file; the import itself still counts as done.

mod copy;

pub use copy::{
    SidecarCopy, copy_sidecars, copy_to_new, delete_originals, preserve_timestamps,
    sidecar_destination,
};

use futures::stream::{self, Stream};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::config::{ImportConfig, Settings};
use crate::error::{Error, Result};
use crate::model::{ImportProgress, ImportStatus, MediaFile};

/// A file changed status.
#[derive(Debug, Clone)]
pub struct ImportUpdate {
    pub file: MediaFile,
    pub progress: ImportProgress,
}

/// Progress of an import batch. The stream always ends with `Finished`.
#[derive(Debug, Clone)]
pub enum ImportEvent {
    File(ImportUpdate),
    Finished(ImportSummary),
}

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    Completed,
    /// Everything copied, but some files carry a non-fatal annotation
    CompletedWithWarnings,
    CompletedWithFailures,
    Cancelled,
}

/// Totals for a finished (or cancelled) batch.
#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub imported: usize,
    pub failed: usize,
    /// Imported files carrying a non-fatal annotation
    pub warnings: usize,
    /// Files never started because the batch was cancelled
    pub not_started: usize,
    pub cancelled: bool,
    pub progress: ImportProgress,
    /// Last known state of every submitted file
    pub files: Vec<MediaFile>,
}

impl ImportSummary {
    pub fn outcome(&self) -> ImportOutcome {
        if self.cancelled {
            ImportOutcome::Cancelled
        } else if self.failed > 0 {
            ImportOutcome::CompletedWithFailures
        } else if self.warnings > 0 {
            ImportOutcome::CompletedWithWarnings
        } else {
            ImportOutcome::Completed
        }
    }
}

/// Runs import batches.
#[derive(Clone)]
pub struct ImportEngine {
    config: ImportConfig,
    span: Span,
}

impl ImportEngine {
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            span: tracing::info_span!("import"),
        }
    }

    /// Log under the given span instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Start importing `files` into the settings' destination.
    ///
    /// Only `Waiting` files with a destination path are submitted; the rest
    /// are ignored. Fails up front if the destination is unset or unusable.
    pub fn import(
        &self,
        files: Vec<MediaFile>,
        settings: &Settings,
        cancel: CancellationToken,
    ) -> Result<impl Stream<Item = ImportEvent> + use<>> {
        let root = settings
            .reachable_destination()
            .ok_or_else(|| Error::DestinationUnreachable(settings.destination.clone()))?
            .to_path_buf();

        let batch: Vec<MediaFile> = files
            .into_iter()
            .filter(|f| f.status == ImportStatus::Waiting)
            .filter(|f| {
                let planned = f.dest_path.is_some();
                if !planned {
                    tracing::warn!(target: "import", path = %f.source_path.display(), "Skipping file without destination");
                }
                planned
            })
            .collect();

        let (tx, rx) = mpsc::channel(64);
        let run = BatchRun {
            config: self.config.clone(),
            delete_originals: settings.delete_originals,
            root,
            cancel,
            tx,
        };
        tokio::spawn(run.execute(batch).instrument(self.span.clone()));

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }))
    }
}

struct BatchRun {
    config: ImportConfig,
    delete_originals: bool,
    root: PathBuf,
    cancel: CancellationToken,
    tx: mpsc::Sender<ImportEvent>,
}

impl BatchRun {
    async fn execute(self, mut batch: Vec<MediaFile>) {
        let started = Instant::now();
        let mut summary = ImportSummary {
            progress: ImportProgress::for_batch(&batch),
            ..ImportSummary::default()
        };
        tracing::info!(
            target: "import",
            root = %self.root.display(),
            files = summary.progress.files_total,
            bytes = summary.progress.bytes_total,
            "Import started"
        );

        for idx in 0..batch.len() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                summary.not_started = batch.len() - idx;
                break;
            }

            let finished = self.import_one(&mut batch[idx], &mut summary.progress).await;
            if !finished {
                // Cancelled mid-copy; this file keeps its last reported status
                summary.cancelled = true;
                summary.not_started = batch.len() - idx - 1;
                break;
            }

            let file = &batch[idx];
            match file.status {
                ImportStatus::Imported if file.import_error.is_some() => {
                    summary.imported += 1;
                    summary.warnings += 1;
                }
                ImportStatus::Imported => summary.imported += 1,
                _ => summary.failed += 1,
            }
        }

        tracing::info!(
            target: "import",
            imported = summary.imported,
            failed = summary.failed,
            warnings = summary.warnings,
            cancelled = summary.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Import finished"
        );
        summary.files = batch;
        let _ = self.tx.send(ImportEvent::Finished(summary)).await;
    }

    async fn emit(&self, file: &MediaFile, progress: ImportProgress) {
        let update = ImportUpdate {
            file: file.clone(),
            progress,
        };
        // A dropped receiver only means nobody is watching
        let _ = self.tx.send(ImportEvent::File(update)).await;
    }

    /// Returns `false` if the copy was cancelled.
    async fn import_one(&self, file: &mut MediaFile, progress: &mut ImportProgress) -> bool {
        let Some(dest) = file.dest_path.clone() else {
            return true;
        };

        file.advance(ImportStatus::Copying);
        self.emit(file, *progress).await;

        let copied = {
            let (source, target, size) = (file.source_path.clone(), dest.clone(), file.size_bytes);
            let (config, cancel) = (self.config.clone(), self.cancel.clone());
            tokio::task::spawn_blocking(move || copy_to_new(&source, &target, size, &config, &cancel))
                .await
                .unwrap_or_else(|e| Err(Error::copy_failed(&dest, std::io::Error::other(e))))
        };

        match copied {
            Ok(bytes) => progress.bytes_copied += bytes,
            Err(e) if e.is_cancelled() => {
                tracing::info!(target: "import", path = %file.source_path.display(), "Copy cancelled");
                return false;
            }
            Err(e) => {
                tracing::warn!(target: "import", path = %file.source_path.display(), error = %e, "Copy failed");
                file.fail(e.to_string());
                progress.files_processed += 1;
                self.emit(file, *progress).await;
                return true;
            }
        }

        file.advance(ImportStatus::Verifying);
        self.emit(file, *progress).await;

        let actual = tokio::fs::metadata(&dest).await.map(|m| m.len());
        let verified = match actual {
            Ok(actual) if actual == file.size_bytes => Ok(()),
            Ok(actual) => Err(Error::VerificationFailed {
                path: dest.clone(),
                expected: file.size_bytes,
                actual,
            }),
            Err(e) => Err(Error::copy_failed(&dest, e)),
        };
        if let Err(e) = verified {
            // The artifact stays for inspection
            tracing::warn!(target: "import", path = %dest.display(), error = %e, "Verification failed");
            file.fail(e.to_string());
            progress.files_processed += 1;
            self.emit(file, *progress).await;
            return true;
        }

        let annotation = self.finalize(file, &dest).await;
        file.advance(ImportStatus::Imported);
        file.import_error = annotation;
        progress.files_processed += 1;
        tracing::debug!(target: "import", source = %file.source_path.display(), dest = %dest.display(), "Imported");
        self.emit(file, *progress).await;
        true
    }

    /// Timestamps, sidecars and optional deletion. Returns a non-fatal
    /// annotation if a sidecar was left behind or an original could not be
    /// deleted.
    async fn finalize(&self, file: &MediaFile, dest: &std::path::Path) -> Option<String> {
        let source = file.source_path.clone();
        let dest = dest.to_path_buf();
        let sidecars = file.sidecar_paths.clone();
        let copy_sidecars = self.config.copy_sidecars;
        let delete = self.delete_originals;

        let result = tokio::task::spawn_blocking(move || {
            if let Err(e) = preserve_timestamps(&source, &dest) {
                tracing::warn!(target: "import", path = %dest.display(), error = %e, "Could not preserve timestamps");
            }

            // Only sidecars whose content made it across are deleted with the original
            let SidecarCopy { present, mut problems } = if copy_sidecars {
                copy::copy_sidecars(&source, &dest, &sidecars)
            } else {
                SidecarCopy::default()
            };

            if delete {
                for error in delete_originals(&source, &present) {
                    tracing::warn!(target: "import", error = %error, "Original not deleted");
                    problems.push(error);
                }
            }
            problems
        })
        .await;

        let notes = match result {
            Ok(notes) => notes,
            Err(e) => vec![format!("Finalize task failed: {e}")],
        };
        (!notes.is_empty()).then(|| notes.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::scanner::Scanner;
    use crate::test_utils::collect_import;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn flat(dest: &Path) -> Settings {
        Settings {
            destination: Some(dest.to_path_buf()),
            organize_by_date: false,
            ..Settings::default()
        }
    }

    async fn scan(src: &Path, settings: &Settings) -> Vec<MediaFile> {
        Scanner::new(ScanConfig::default())
            .scan_to_end(src.to_path_buf(), settings.clone(), CancellationToken::new())
            .await
            .unwrap()
    }

    fn count_files(dir: &Path) -> usize {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    #[tokio::test]
    async fn test_unreachable_destination_fails_up_front() {
        let engine = ImportEngine::new(ImportConfig::default());
        let result = engine.import(Vec::new(), &Settings::default(), CancellationToken::new());
        assert!(matches!(result, Err(Error::DestinationUnreachable(None))));
    }

    #[tokio::test]
    async fn test_import_then_rescan_is_idempotent() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(src.path().join("one.jpg"), b"first").unwrap();
        fs::write(src.path().join("two.mov"), b"second clip").unwrap();
        let settings = Settings {
            destination: Some(dest.path().to_path_buf()),
            rename_by_date: true,
            ..Settings::default()
        };

        let files = scan(src.path(), &settings).await;
        let engine = ImportEngine::new(ImportConfig::default());
        let (updates, summary) = collect_import(&engine, files, &settings).await;
        assert_eq!(summary.outcome(), ImportOutcome::Completed);
        assert_eq!(summary.imported, 2);
        assert!(!updates.is_empty());

        let rescanned = scan(src.path(), &settings).await;
        assert!(rescanned.iter().all(|f| f.status == ImportStatus::PreExisting));

        let (updates, summary) = collect_import(&engine, rescanned, &settings).await;
        assert!(updates.is_empty());
        assert_eq!(summary.progress.files_total, 0);
        assert_eq!(count_files(dest.path()), 2);
    }

    #[tokio::test]
    async fn test_statuses_move_forward_per_file() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(src.path().join("a.jpg"), b"aaaa").unwrap();
        let settings = flat(dest.path());

        let files = scan(src.path(), &settings).await;
        let engine = ImportEngine::new(ImportConfig::default());
        let (updates, summary) = collect_import(&engine, files, &settings).await;

        let statuses: Vec<_> = updates.iter().map(|u| u.file.status).collect();
        assert_eq!(
            statuses,
            vec![ImportStatus::Copying, ImportStatus::Verifying, ImportStatus::Imported]
        );
        let last = updates.last().unwrap();
        assert_eq!(last.progress.files_processed, 1);
        assert_eq!(last.progress.bytes_copied, 4);
        assert_eq!(summary.progress.fraction(), 1.0);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        for name in ["1.jpg", "2.jpg", "3.jpg"] {
            fs::write(src.path().join(name), name.as_bytes()).unwrap();
        }
        let settings = flat(dest.path());
        let files = scan(src.path(), &settings).await;
        fs::remove_file(src.path().join("2.jpg")).unwrap();

        let engine = ImportEngine::new(ImportConfig::default());
        let (_, summary) = collect_import(&engine, files, &settings).await;

        assert_eq!(summary.outcome(), ImportOutcome::CompletedWithFailures);
        let statuses: Vec<_> = summary.files.iter().map(|f| f.status).collect();
        assert_eq!(
            statuses,
            vec![ImportStatus::Imported, ImportStatus::Failed, ImportStatus::Imported]
        );
        assert!(summary.files[1].import_error.is_some());
        assert!(summary.files[0].import_error.is_none());
        assert!(!dest.path().join("2.jpg").exists());
    }

    #[tokio::test]
    async fn test_size_mismatch_fails_and_keeps_artifact() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let path = src.path().join("grow.jpg");
        fs::write(&path, b"12345").unwrap();
        let settings = flat(dest.path());
        let files = scan(src.path(), &settings).await;

        // The source changes between scan and import
        fs::write(&path, b"1234567890").unwrap();

        let engine = ImportEngine::new(ImportConfig::default());
        let (_, summary) = collect_import(&engine, files, &settings).await;

        let file = &summary.files[0];
        assert_eq!(file.status, ImportStatus::Failed);
        assert!(file.import_error.as_deref().unwrap().contains("expected 5"));
        assert!(dest.path().join("grow.jpg").exists());
    }

    #[tokio::test]
    async fn test_delete_originals_with_sidecars() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(src.path().join("IMG_1.HEIC"), b"heic").unwrap();
        fs::write(src.path().join("IMG_1.AAE"), b"edits").unwrap();
        let settings = Settings {
            delete_originals: true,
            ..flat(dest.path())
        };

        let files = scan(src.path(), &settings).await;
        assert_eq!(files[0].sidecar_paths.len(), 1);

        let engine = ImportEngine::new(ImportConfig::default());
        let (_, summary) = collect_import(&engine, files, &settings).await;

        assert_eq!(summary.outcome(), ImportOutcome::Completed);
        assert!(!src.path().join("IMG_1.HEIC").exists());
        assert!(!src.path().join("IMG_1.AAE").exists());
        assert_eq!(fs::read(dest.path().join("IMG_1.HEIC")).unwrap(), b"heic");
        assert_eq!(fs::read(dest.path().join("IMG_1.AAE")).unwrap(), b"edits");
    }

    #[tokio::test]
    async fn test_conflicting_sidecar_is_kept_with_its_edits() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(src.path().join("IMG_1.JPG"), b"jpeg").unwrap();
        fs::write(src.path().join("IMG_1.XMP"), b"MY EDITS").unwrap();
        fs::write(dest.path().join("IMG_1.XMP"), b"someone else's xmp").unwrap();
        let settings = Settings {
            delete_originals: true,
            ..flat(dest.path())
        };

        let files = scan(src.path(), &settings).await;
        let engine = ImportEngine::new(ImportConfig::default());
        let (_, summary) = collect_import(&engine, files, &settings).await;

        assert_eq!(summary.outcome(), ImportOutcome::CompletedWithWarnings);
        let file = &summary.files[0];
        assert_eq!(file.status, ImportStatus::Imported);
        assert!(file.import_error.as_deref().unwrap().contains("IMG_1.XMP"));
        assert!(!src.path().join("IMG_1.JPG").exists());
        assert_eq!(fs::read(src.path().join("IMG_1.XMP")).unwrap(), b"MY EDITS");
        assert_eq!(fs::read(dest.path().join("IMG_1.XMP")).unwrap(), b"someone else's xmp");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_deletion_is_a_warning() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(src.path().join("locked.jpg"), b"locked").unwrap();
        let settings = Settings {
            delete_originals: true,
            ..flat(dest.path())
        };
        let files = scan(src.path(), &settings).await;

        fs::set_permissions(src.path(), fs::Permissions::from_mode(0o555)).unwrap();
        if fs::write(src.path().join("writable"), b"").is_ok() {
            // Permission bits do not apply to this user
            fs::set_permissions(src.path(), fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let engine = ImportEngine::new(ImportConfig::default());
        let (_, summary) = collect_import(&engine, files, &settings).await;
        fs::set_permissions(src.path(), fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(summary.outcome(), ImportOutcome::CompletedWithWarnings);
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.warnings, 1);
        let file = &summary.files[0];
        assert_eq!(file.status, ImportStatus::Imported);
        assert!(file.import_error.is_some());
        assert!(src.path().join("locked.jpg").exists());
        assert_eq!(fs::read(dest.path().join("locked.jpg")).unwrap(), b"locked");
    }

    #[tokio::test]
    async fn test_cancel_during_large_copy() {
        use futures::StreamExt;

        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(src.path().join("a_big.mov"), vec![7u8; 64 * 1024 * 1024]).unwrap();
        fs::write(src.path().join("b.jpg"), b"b").unwrap();
        fs::write(src.path().join("c.jpg"), b"c").unwrap();
        let settings = flat(dest.path());
        let files = scan(src.path(), &settings).await;
        assert_eq!(files[0].source_path, src.path().join("a_big.mov"));

        let engine = ImportEngine::new(ImportConfig {
            large_file_threshold: 1,
            cancel_check_interval: 1,
            ..ImportConfig::default()
        });
        let cancel = CancellationToken::new();
        let stream = engine.import(files, &settings, cancel.clone()).unwrap();
        let mut stream = std::pin::pin!(stream);

        let mut summary = None;
        while let Some(event) = stream.next().await {
            match event {
                ImportEvent::File(update) => {
                    assert_eq!(update.file.status, ImportStatus::Copying);
                    cancel.cancel();
                }
                ImportEvent::Finished(s) => summary = Some(s),
            }
        }

        let summary = summary.unwrap();
        assert_eq!(summary.outcome(), ImportOutcome::Cancelled);
        assert!(summary.cancelled);
        assert_eq!(summary.not_started, 2);
        assert_eq!(summary.imported + summary.failed, 0);
        assert_eq!(summary.files[0].status, ImportStatus::Copying);
        assert!(summary.files.iter().all(|f| f.import_error.is_none()));
        assert!(summary.files[1..].iter().all(|f| f.status == ImportStatus::Waiting));
        assert_eq!(count_files(dest.path()), 0);
    }

    #[tokio::test]
    async fn test_duplicates_produce_one_destination_file() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let bytes = vec![9u8; 100];
        fs::write(src.path().join("a.jpg"), &bytes).unwrap();
        fs::write(src.path().join("b.jpg"), &bytes).unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(src.path().join("a.jpg"), mtime).unwrap();
        filetime::set_file_mtime(src.path().join("b.jpg"), mtime).unwrap();
        let settings = flat(dest.path());

        let files = scan(src.path(), &settings).await;
        assert_eq!(files[0].status, ImportStatus::Waiting);
        assert_eq!(files[1].status, ImportStatus::DuplicateInSource);

        let engine = ImportEngine::new(ImportConfig::default());
        let (_, summary) = collect_import(&engine, files, &settings).await;
        assert_eq!(summary.imported, 1);
        assert_eq!(count_files(dest.path()), 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_leaves_files_untouched() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        fs::write(src.path().join("a.jpg"), b"a").unwrap();
        fs::write(src.path().join("b.jpg"), b"bb").unwrap();
        let settings = flat(dest.path());
        let files = scan(src.path(), &settings).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = ImportEngine::new(ImportConfig::default());
        let events: Vec<ImportEvent> = {
            use futures::StreamExt;
            engine.import(files, &settings, cancel).unwrap().collect().await
        };

        assert_eq!(events.len(), 1);
        let ImportEvent::Finished(summary) = &events[0] else {
            panic!("expected only a summary");
        };
        assert_eq!(summary.outcome(), ImportOutcome::Cancelled);
        assert_eq!(summary.not_started, 2);
        assert!(summary.files.iter().all(|f| f.status == ImportStatus::Waiting));
        assert!(summary.files.iter().all(|f| f.import_error.is_none()));
        assert_eq!(count_files(dest.path()), 0);
    }

    #[test]
    fn test_outcome_precedence() {
        let mut summary = ImportSummary::default();
        assert_eq!(summary.outcome(), ImportOutcome::Completed);
        summary.warnings = 1;
        assert_eq!(summary.outcome(), ImportOutcome::CompletedWithWarnings);
        summary.failed = 1;
        assert_eq!(summary.outcome(), ImportOutcome::CompletedWithFailures);
        summary.cancelled = true;
        assert_eq!(summary.outcome(), ImportOutcome::Cancelled);
    }
}
