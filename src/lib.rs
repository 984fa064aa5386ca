//! Media Import - copy photos, videos and audio off a card into an
//! organized library.
//!
//! The engine is split into a few cooperating parts:
//! - [`scanner`]: walks a source tree and streams enriched, planned records
//! - [`thumbnail`]: bounded preview cache shared by concurrent requests
//! - [`organizer`] and [`planner`]: destination paths and collision handling
//! - [`import`]: copy, verify and finalize a batch
//! - [`recalc`]: re-plan a scanned batch when the destination settings change

pub mod cli;
pub mod config;
pub mod error;
pub mod hash;
pub mod import;
pub mod metadata;
pub mod model;
pub mod organizer;
pub mod planner;
pub mod recalc;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;
pub mod thumbnail;

pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use import::{ImportEngine, ImportEvent, ImportSummary};
pub use model::{ImportStatus, MediaFile, MediaType};
pub use recalc::Recalculator;
pub use scanner::{ScanEvent, Scanner};
pub use thumbnail::ThumbnailCache;
