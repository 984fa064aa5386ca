//! Source scanning.
//!
//! A scan runs in stages and reports each one on a stream:
//!
//! 1. **Enumerate** the source tree (sorted, blocking pool) and emit the
//!    skeleton list right away.
//! 2. **Enrich** records concurrently: capture date and thumbnail.
//! 3. **Deduplicate** within the batch.
//! 4. **Plan** destinations against the current settings.
//!
//! The stream always ends with exactly one [`ScanEvent::Finished`] or
//! [`ScanEvent::Cancelled`].
//!
//! # Usage
//!
//! ```ignore
//! let scanner = Scanner::new(ScanConfig::default()).with_thumbnails(cache, 256);
//! let mut events = pin!(scanner.scan(root, settings, cancel.clone()));
//! while let Some(event) = events.next().await {
//!     if let ScanEvent::Finished(files) = event { /* ... */ }
//! }
//! ```

pub mod duplicates;
mod walk;

pub use walk::{SIDECAR_EXTENSIONS, enumerate, is_sidecar};

use futures::stream::{self, Stream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::config::{ScanConfig, Settings};
use crate::metadata;
use crate::model::MediaFile;
use crate::planner::plan_destinations;
use crate::thumbnail::ThumbnailCache;

/// Progress of a scan.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Every record found by enumeration, before enrichment
    Discovered(Vec<MediaFile>),
    /// One record with capture date and thumbnail filled in
    Enriched(MediaFile),
    /// The complete batch, deduplicated and planned, in source-path order
    Finished(Vec<MediaFile>),
    Cancelled,
}

/// Scans source trees into planned [`MediaFile`] batches.
#[derive(Clone)]
pub struct Scanner {
    config: ScanConfig,
    thumbnails: Option<(ThumbnailCache, u32)>,
    span: Span,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            thumbnails: None,
            span: tracing::info_span!("scanner"),
        }
    }

    /// Generate previews of `size` pixels through the given cache.
    pub fn with_thumbnails(mut self, cache: ThumbnailCache, size: u32) -> Self {
        self.thumbnails = Some((cache, size));
        self
    }

    /// Log under the given span instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Scan `root` in the background and stream progress.
    ///
    /// Dropping the stream stops the scan.
    pub fn scan(
        &self,
        root: PathBuf,
        settings: Settings,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ScanEvent> + use<> {
        let (tx, rx) = mpsc::channel(64);
        let scanner = self.clone();
        let span = self.span.clone();

        tokio::spawn(
            async move {
                let last = match scanner.run(root, settings, &cancel, &tx).await {
                    Some(files) => ScanEvent::Finished(files),
                    None => ScanEvent::Cancelled,
                };
                let _ = tx.send(last).await;
            }
            .instrument(span),
        );

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
    }

    /// Run a scan to completion and return the final batch (`None` if cancelled).
    pub async fn scan_to_end(
        &self,
        root: PathBuf,
        settings: Settings,
        cancel: CancellationToken,
    ) -> Option<Vec<MediaFile>> {
        let events = self.scan(root, settings, cancel);
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            match event {
                ScanEvent::Finished(files) => return Some(files),
                ScanEvent::Cancelled => return None,
                _ => {}
            }
        }
        None
    }

    async fn run(
        &self,
        root: PathBuf,
        settings: Settings,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<ScanEvent>,
    ) -> Option<Vec<MediaFile>> {
        let started = Instant::now();
        tracing::info!(target: "scanner", root = %root.display(), "Scanning source");

        let skeleton = {
            let (root, settings, config, cancel) =
                (root.clone(), settings.clone(), self.config.clone(), cancel.clone());
            match tokio::task::spawn_blocking(move || enumerate(&root, &settings, &config, &cancel)).await {
                Ok(result) => result?,
                Err(e) => {
                    tracing::error!(target: "scanner", error = %e, "Enumeration task failed");
                    Vec::new()
                }
            }
        };
        tracing::debug!(target: "scanner", files = skeleton.len(), "Enumerated");
        tx.send(ScanEvent::Discovered(skeleton.clone())).await.ok()?;

        let total = skeleton.len();
        let mut enriching = stream::iter(skeleton)
            .map(move |file| self.enrich(file, cancel))
            .buffer_unordered(self.config.concurrency.max(1));

        let mut files = Vec::with_capacity(total);
        while let Some(file) = enriching.next().await {
            let file = file?;
            tx.send(ScanEvent::Enriched(file.clone())).await.ok()?;
            files.push(file);
        }
        drop(enriching);
        files.sort_by(|a, b| a.source_path.cmp(&b.source_path));

        if cancel.is_cancelled() {
            return None;
        }
        let duplicates = self.mark_duplicates(&mut files).await;

        let files = Arc::new(files);
        let planned = {
            let (files, settings, config, cancel) =
                (Arc::clone(&files), settings.clone(), self.config.clone(), cancel.clone());
            tokio::task::spawn_blocking(move || plan_destinations(&files, &settings, &config, &cancel)).await
        };
        let planned = match planned {
            Ok(result) => result?,
            Err(e) => {
                tracing::error!(target: "scanner", error = %e, "Destination planning failed");
                Arc::unwrap_or_clone(files)
            }
        };

        tracing::info!(
            target: "scanner",
            files = planned.len(),
            duplicates,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan complete"
        );
        Some(planned)
    }

    async fn enrich(&self, mut file: MediaFile, cancel: &CancellationToken) -> Option<MediaFile> {
        if cancel.is_cancelled() {
            return None;
        }

        let (path, media_type, modified_at) =
            (file.source_path.clone(), file.media_type, file.modified_at);
        file.capture_date = tokio::task::spawn_blocking(move || {
            metadata::capture_date(&path, media_type, modified_at)
        })
        .await
        .unwrap_or_else(|_| modified_at.map(metadata::system_time_to_local));

        if let Some((cache, size)) = &self.thumbnails {
            file.thumbnail = cache.get_for(&file, *size).await;
        }
        Some(file)
    }

    async fn mark_duplicates(&self, files: &mut [MediaFile]) -> usize {
        let candidates = duplicates::hash_candidates(files, &self.config);
        let digests = if candidates.is_empty() {
            duplicates::Digests::new()
        } else {
            tokio::task::spawn_blocking(move || duplicates::compute_digests(candidates))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(target: "scanner", error = %e, "Digest task failed, using heuristic");
                    duplicates::Digests::new()
                })
        };
        duplicates::mark_duplicates(files, &self.config, &digests)
    }
}
