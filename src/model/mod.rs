//! Core data models for the import engine.
//!
//! Defines [`MediaFile`] (one record per discovered source item), its
//! [`ImportStatus`] lifecycle, and the [`ImportProgress`] totals reported
//! while copying.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::thumbnail::Thumbnail;

/// Kind of media, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    RawImage,
    Unknown,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "heic", "heif",
];
const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "nrw", "arw", "srf", "sr2", "dng", "raf", "orf", "rw2", "pef", "srw",
    "x3f",
];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "m4v", "avi", "mkv", "mts", "m2ts", "3gp", "wmv", "mpg", "mpeg",
];
const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "aac", "flac", "ogg", "wma", "aiff",
];

impl MediaType {
    /// Classify a path by its extension (case-insensitive).
    ///
    /// Unrecognized or missing extensions map to [`MediaType::Unknown`].
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Self::Unknown;
        };
        let ext = ext.to_lowercase();
        let ext = ext.as_str();
        if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else if RAW_EXTENSIONS.contains(&ext) {
            Self::RawImage
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Self::Audio
        } else {
            Self::Unknown
        }
    }

    /// Filename prefix used when renaming by date.
    pub fn rename_prefix(&self) -> Option<&'static str> {
        match self {
            Self::Image => Some("IMG"),
            Self::RawImage => Some("RAW"),
            Self::Video => Some("VID"),
            Self::Audio => Some("AUD"),
            Self::Unknown => None,
        }
    }
}

/// Where a file is in its scan/import lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// Ready to import (may still lack a destination)
    #[default]
    Waiting,
    /// An identical file already sits at the destination path
    PreExisting,
    /// Same content as an earlier file in this batch
    DuplicateInSource,
    Copying,
    Verifying,
    Imported,
    Failed,
}

impl ImportStatus {
    /// Terminal states end a file's import pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Imported | Self::Failed)
    }

    /// Position in the import pipeline, used to keep transitions forward-only.
    ///
    /// Statuses outside the pipeline have no rank.
    pub fn pipeline_rank(&self) -> Option<u8> {
        match self {
            Self::Waiting => Some(0),
            Self::Copying => Some(1),
            Self::Verifying => Some(2),
            Self::Imported | Self::Failed => Some(3),
            Self::PreExisting | Self::DuplicateInSource => None,
        }
    }

    /// Short label for terminal output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::PreExisting => "already imported",
            Self::DuplicateInSource => "duplicate",
            Self::Copying => "copying",
            Self::Verifying => "verifying",
            Self::Imported => "imported",
            Self::Failed => "failed",
        }
    }
}

/// Cache identity of a source file.
///
/// Includes size and modification time so a replaced file never reuses a
/// stale preview.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: Option<SystemTime>,
}

/// One discovered source item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    /// Absolute path on the source tree
    pub source_path: PathBuf,
    /// File name for display
    pub name: String,
    pub media_type: MediaType,
    /// Companion files that travel with this one
    pub sidecar_paths: Vec<PathBuf>,
    /// Best-known recording time (wall clock)
    pub capture_date: Option<NaiveDateTime>,
    /// Source filesystem modification time
    pub modified_at: Option<SystemTime>,
    pub size_bytes: u64,
    /// Absolute destination path, once a destination is known
    pub dest_path: Option<PathBuf>,
    pub status: ImportStatus,
    #[serde(skip)]
    pub thumbnail: Option<Thumbnail>,
    pub import_error: Option<String>,
    /// For duplicates: the earlier file this one repeats
    pub duplicate_of: Option<PathBuf>,
}

impl MediaFile {
    /// Create a lightweight record straight from enumeration.
    pub fn discovered(
        source_path: PathBuf,
        media_type: MediaType,
        size_bytes: u64,
        modified_at: Option<SystemTime>,
    ) -> Self {
        let name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            source_path,
            name,
            media_type,
            sidecar_paths: Vec::new(),
            capture_date: None,
            modified_at,
            size_bytes,
            dest_path: None,
            status: ImportStatus::Waiting,
            thumbnail: None,
            import_error: None,
            duplicate_of: None,
        }
    }

    pub fn identity(&self) -> FileIdentity {
        FileIdentity {
            path: self.source_path.clone(),
            size_bytes: self.size_bytes,
            modified_at: self.modified_at,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.status == ImportStatus::DuplicateInSource
    }

    /// Forget any destination decision (used before re-planning).
    pub fn reset_destination(&mut self) {
        self.dest_path = None;
        self.status = ImportStatus::Waiting;
        self.import_error = None;
    }

    /// Move along the import pipeline. Backward moves are ignored and
    /// reported as `false`.
    pub fn advance(&mut self, next: ImportStatus) -> bool {
        match (self.status.pipeline_rank(), next.pipeline_rank()) {
            (Some(current), Some(target)) if target > current => {
                self.status = next;
                true
            }
            _ => false,
        }
    }

    /// Mark the file failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.advance(ImportStatus::Failed) {
            self.import_error = Some(reason.into());
        }
    }
}

/// Running totals for an import batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub files_processed: usize,
    pub files_total: usize,
    pub bytes_copied: u64,
    pub bytes_total: u64,
}

impl ImportProgress {
    /// Totals for every file that will actually be copied.
    pub fn for_batch<'a>(files: impl IntoIterator<Item = &'a MediaFile>) -> Self {
        let mut progress = Self::default();
        for file in files {
            if file.status == ImportStatus::Waiting {
                progress.files_total += 1;
                progress.bytes_total += file.size_bytes;
            }
        }
        progress
    }

    /// Completion as a fraction of bytes (0.0 - 1.0).
    pub fn fraction(&self) -> f32 {
        if self.bytes_total == 0 {
            if self.files_total == 0 {
                1.0
            } else {
                self.files_processed as f32 / self.files_total as f32
            }
        } else {
            self.bytes_copied as f32 / self.bytes_total as f32
        }
    }
}
