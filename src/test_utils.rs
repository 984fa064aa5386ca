//! Test utilities and fixtures.
//!
//! Builders for [`MediaFile`] records, small on-disk fixtures and helpers
//! that drain scan and import streams.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{date, media_file};
//!
//! let file = media_file("/card/IMG_1.JPG", 10, Some(date("2024-07-13 18:45:02")));
//! ```

use chrono::NaiveDateTime;
use futures::StreamExt;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::import::{ImportEngine, ImportEvent, ImportSummary, ImportUpdate};
use crate::model::{MediaFile, MediaType};
use crate::scanner::{ScanEvent, Scanner};

/// A record for a path that need not exist. Type comes from the extension.
pub fn media_file(path: &str, size: u64, capture: Option<NaiveDateTime>) -> MediaFile {
    let path = PathBuf::from(path);
    let media_type = MediaType::from_path(&path);
    let mut file = MediaFile::discovered(path, media_type, size, None);
    file.capture_date = capture;
    file
}

/// Parse `YYYY-MM-DD HH:MM:SS`.
pub fn date(text: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").expect("fixture date")
}

/// Write a decodable PNG of the given dimensions.
pub fn write_png(path: &Path, width: u32, height: u32) {
    let image = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7) as u8, (y * 13) as u8, 128])
    });
    image.save(path).expect("write png fixture");
}

/// Write `bytes` to `dir/name` and return the record a scan would produce
/// for it (real size and mtime, the given capture date).
pub fn source_file(dir: &Path, name: &str, bytes: &[u8], capture: Option<NaiveDateTime>) -> MediaFile {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("write source fixture");
    let meta = fs::metadata(&path).expect("stat source fixture");
    let mut file = MediaFile::discovered(
        path.clone(),
        MediaType::from_path(&path),
        meta.len(),
        meta.modified().ok(),
    );
    file.capture_date = capture;
    file
}

/// Drain a scan and return every event in order.
pub async fn collect_scan(
    scanner: &Scanner,
    root: &Path,
    settings: &Settings,
    cancel: CancellationToken,
) -> Vec<ScanEvent> {
    scanner
        .scan(root.to_path_buf(), settings.clone(), cancel)
        .collect()
        .await
}

/// Run an import to the end. Panics if the destination is rejected.
pub async fn collect_import(
    engine: &ImportEngine,
    files: Vec<MediaFile>,
    settings: &Settings,
) -> (Vec<ImportUpdate>, ImportSummary) {
    let events = engine
        .import(files, settings, CancellationToken::new())
        .expect("destination accepted");
    let mut events = std::pin::pin!(events);

    let mut updates = Vec::new();
    while let Some(event) = events.next().await {
        match event {
            ImportEvent::File(update) => updates.push(update),
            ImportEvent::Finished(summary) => return (updates, summary),
        }
    }
    panic!("import stream ended without a summary");
}
