//! Phase 1: fast enumeration of a source tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::config::{ScanConfig, Settings};
use crate::model::{MediaFile, MediaType};

/// Companion files that travel with a media file but are never imported
/// on their own.
pub const SIDECAR_EXTENSIONS: &[&str] = &["xmp", "thm", "aae", "lrv", "lrf", "xml"];

/// Camera and OS housekeeping folders (matched case-insensitively).
const SKIPPED_DIRS: &[&str] = &[
    ".thumbnails",
    "thumbnails",
    "thmbnl",
    "@eadir",
    ".spotlight-v100",
    ".trashes",
    ".fseventsd",
];

pub fn is_sidecar(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SIDECAR_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy().to_lowercase();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str())
}

fn lower_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_lowercase())
}

fn lower_name(path: &Path) -> Option<String> {
    path.file_name().map(|s| s.to_string_lossy().to_lowercase())
}

/// Walk `root` and return lightweight records in sorted path order.
///
/// Sidecars are attached to the media file sharing their base name in the
/// same directory (`IMG_1.JPG` + `IMG_1.XMP`, or `DSC_2.NEF.xmp`). Returns
/// `None` if cancelled.
pub fn enumerate(
    root: &Path,
    settings: &Settings,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> Option<Vec<MediaFile>> {
    let mut files: Vec<MediaFile> = Vec::new();
    let mut sidecars: Vec<PathBuf> = Vec::new();
    // (directory, lowercase stem or name) -> index of the most recent match
    let mut by_stem: HashMap<(PathBuf, String), usize> = HashMap::new();
    let mut by_name: HashMap<(PathBuf, String), usize> = HashMap::new();

    let skip_dirs = config.skip_thumbnail_dirs;
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(skip_dirs && is_skipped_dir(e)));

    for entry in walker {
        if cancel.is_cancelled() {
            return None;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(target: "scanner", error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if is_sidecar(path) {
            sidecars.push(path.to_path_buf());
            continue;
        }

        let media_type = MediaType::from_path(path);
        if !settings.include.includes(media_type) {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(target: "scanner", path = %path.display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let idx = files.len();
        if let Some(stem) = lower_stem(path) {
            by_stem.insert((dir.clone(), stem), idx);
        }
        if let Some(name) = lower_name(path) {
            by_name.insert((dir, name), idx);
        }
        files.push(MediaFile::discovered(
            path.to_path_buf(),
            media_type,
            meta.len(),
            meta.modified().ok(),
        ));
    }

    for sidecar in sidecars {
        let dir = sidecar.parent().map(Path::to_path_buf).unwrap_or_default();
        let Some(stem) = lower_stem(&sidecar) else {
            continue;
        };
        let key = (dir, stem);
        let owner = by_stem.get(&key).or_else(|| by_name.get(&key));
        match owner {
            Some(&idx) => files[idx].sidecar_paths.push(sidecar),
            None => {
                tracing::debug!(target: "scanner", path = %sidecar.display(), "Orphan sidecar ignored");
            }
        }
    }

    Some(files)
}
