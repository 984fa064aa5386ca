//! Engine-wide error types.
//!
//! Library modules return [`Error`] via `thiserror`, while the CLI/main
//! uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - Per-file failures (`CopyFailed`, `VerificationFailed`, `DeleteFailed`)
//!   are rendered into `MediaFile::import_error` and never escape a batch.
//! - Per-batch failures (`DestinationUnreachable`, `RecalculationFailed`)
//!   are returned to the caller.
//! - `Cancelled` is distinct from failure and never becomes an `import_error`.

use std::path::PathBuf;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No usable destination root
    #[error("Destination unreachable: {}", display_root(.0))]
    DestinationUnreachable(Option<PathBuf>),

    /// Copying bytes to the destination failed
    #[error("Copy failed for {path}: {source}")]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Destination size does not match the source after copying
    #[error("Verification failed for {path}: expected {expected} bytes, found {actual}")]
    VerificationFailed {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Removing an original after a successful import failed
    #[error("Could not delete original {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Destination recalculation could not complete
    #[error("Recalculation failed: {0}")]
    RecalculationFailed(String),

    /// Metadata extraction error
    #[error("Metadata error for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,
}

fn display_root(root: &Option<PathBuf>) -> String {
    match root {
        Some(path) => path.display().to_string(),
        None => "no destination set".to_string(),
    }
}

impl Error {
    /// Create a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a copy error.
    pub fn copy_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CopyFailed {
            path: path.into(),
            source,
        }
    }

    /// Create a delete error.
    pub fn delete_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DeleteFailed {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
