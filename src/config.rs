//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\media-import\config.toml
//! - macOS: ~/Library/Application Support/media-import/config.toml
//! - Linux: ~/.config/media-import/config.toml
//!
//! The [`Settings`] section is the snapshot the engine consumes; the other
//! sections tune scanning, thumbnails and copying.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::MediaType;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Import settings snapshot
    pub settings: Settings,

    /// Source scanning settings
    pub scan: ScanConfig,

    /// Thumbnail cache settings
    pub thumbnails: ThumbnailConfig,

    /// Copy pipeline settings
    pub import: ImportConfig,
}

/// The settings snapshot handed to the scanner, import engine and
/// recalculation. The destination may be unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Destination root directory
    pub destination: Option<PathBuf>,

    /// Place files under `YYYY/MM` folders
    pub organize_by_date: bool,

    /// Rename files to `YYYYMMDD_HHMMSS.ext`
    pub rename_by_date: bool,

    /// Prefix renamed files with a per-type tag (`IMG_`, `VID_`, ...)
    pub type_prefix: bool,

    /// Remove source files and sidecars after a verified copy
    pub delete_originals: bool,

    /// Which media types to import
    pub include: IncludeTypes,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            destination: None,
            organize_by_date: true,
            rename_by_date: false,
            type_prefix: true,
            delete_originals: false,
            include: IncludeTypes::default(),
        }
    }
}

impl Settings {
    /// Settings with the given destination and everything else default.
    pub fn with_destination(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::default()
        }
    }

    /// The destination root, if it is set and usable.
    ///
    /// A root is usable when it is an existing directory, or when it does
    /// not exist yet but its parent directory does. Relative roots resolve
    /// against the working directory.
    pub fn reachable_destination(&self) -> Option<&Path> {
        let root = self.destination.as_deref()?;
        if root.is_dir() {
            return Some(root);
        }
        let parent_is_dir = match root.parent() {
            // `Imports` has the empty path as its parent
            Some(parent) if parent.as_os_str().is_empty() => Path::new(".").is_dir(),
            Some(parent) => parent.is_dir(),
            None => false,
        };
        (!root.exists() && parent_is_dir).then_some(root)
    }
}

/// Per-media-type inclusion flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeTypes {
    pub images: bool,
    pub raw_images: bool,
    pub videos: bool,
    pub audio: bool,
    /// Files with unrecognized extensions
    pub unknown: bool,
}

impl Default for IncludeTypes {
    fn default() -> Self {
        Self {
            images: true,
            raw_images: true,
            videos: true,
            audio: true,
            unknown: false,
        }
    }
}

impl IncludeTypes {
    /// Whether files of this type should be imported.
    pub fn includes(&self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Image => self.images,
            MediaType::RawImage => self.raw_images,
            MediaType::Video => self.videos,
            MediaType::Audio => self.audio,
            MediaType::Unknown => self.unknown,
        }
    }
}

/// Source scanning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Skip thumbnail/proxy folders and hidden directories
    pub skip_thumbnail_dirs: bool,

    /// Records enriched concurrently
    pub concurrency: usize,

    /// Capture dates closer than this are considered equal
    pub duplicate_date_tolerance_secs: i64,

    /// Confirm duplicate candidates with a full content digest
    pub verify_duplicates_with_hash: bool,

    /// Modification times closer than this are considered equal when
    /// matching an existing destination file (covers FAT/exFAT granularity)
    pub timestamp_tolerance_secs: i64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            skip_thumbnail_dirs: true,
            concurrency: 8,
            duplicate_date_tolerance_secs: 1,
            verify_duplicates_with_hash: true,
            timestamp_tolerance_secs: 2,
        }
    }
}

/// Thumbnail cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Whether the scanner generates previews at all
    pub enabled: bool,

    /// Maximum number of cached previews
    pub capacity: usize,

    /// Longest edge of a preview, in pixels
    pub size: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 2000,
            size: 256,
        }
    }
}

/// Copy pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Files at least this large check for cancellation while copying
    pub large_file_threshold: u64,

    /// Bytes copied between cancellation checks for large files
    pub cancel_check_interval: u64,

    /// Copy sidecar files next to the imported file
    pub copy_sidecars: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            large_file_threshold: 64 * 1024 * 1024,
            cancel_check_interval: 8 * 1024 * 1024,
            copy_sidecars: true,
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("media-import"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from a specific file, with the same fallbacks as [`load`].
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to disk
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)
}

/// Save configuration to a specific file.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

/// Save configuration without blocking the async caller
pub async fn save_async(config: Config) -> Result<(), ConfigError> {
    tokio::task::spawn_blocking(move || save(&config))
        .await
        .map_err(|e| ConfigError::TaskJoin(e.to_string()))?
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

// ============================================================================
// Tests
// ============================================================================
