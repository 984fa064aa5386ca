//! Destination planning shared by scanning and recalculation.
//!
//! Given enriched records and a settings snapshot, assigns every
//! non-duplicate file a unique destination path and detects files that are
//! already present there. Duplicates are passed through untouched.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

use crate::config::{ScanConfig, Settings};
use crate::hash;
use crate::model::{ImportStatus, MediaFile};
use crate::organizer::{Candidate, DestinationProbe, Occupancy, Placement, resolve_collisions};

/// Probes the real destination tree.
///
/// An existing regular file is "the same file" when sizes match and either
/// the names match exactly, the modification times are within tolerance,
/// or the content digests match.
pub struct FsProbe {
    root: PathBuf,
    tolerance: Duration,
}

impl FsProbe {
    pub fn new(root: impl Into<PathBuf>, tolerance_secs: i64) -> Self {
        Self {
            root: root.into(),
            tolerance: Duration::from_secs(tolerance_secs.max(0).unsigned_abs()),
        }
    }

    fn same_file(&self, target: &Path, meta: &fs::Metadata, file: &MediaFile) -> bool {
        if meta.len() != file.size_bytes {
            return false;
        }
        if target.file_name().is_some_and(|n| n.to_string_lossy() == file.name) {
            return true;
        }
        if let (Some(source), Ok(dest)) = (file.modified_at, meta.modified())
            && within(source, dest, self.tolerance)
        {
            return true;
        }
        match hash::same_content(&file.source_path, target) {
            Ok(same) => same,
            Err(e) => {
                tracing::debug!(target: "planner", path = %target.display(), error = %e, "Digest comparison failed");
                false
            }
        }
    }
}

impl DestinationProbe for FsProbe {
    fn probe(&self, relative: &Path, file: &MediaFile) -> Occupancy {
        let target = self.root.join(relative);
        let meta = match fs::symlink_metadata(&target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Occupancy::Free,
            // Can't tell what's there; don't risk it
            Err(_) => return Occupancy::OccupiedByOther,
        };

        if meta.is_file() && self.same_file(&target, &meta, file) {
            Occupancy::SameFile
        } else {
            Occupancy::OccupiedByOther
        }
    }
}

fn within(a: SystemTime, b: SystemTime, tolerance: Duration) -> bool {
    let delta = a.duration_since(b).or_else(|_| b.duration_since(a));
    delta.is_ok_and(|d| d <= tolerance)
}

/// Recompute destinations for a batch.
///
/// Non-duplicates are reset and re-planned against the current destination;
/// when the destination is unset or unreachable they all become `Waiting`
/// with no destination path. Returns `None` if cancelled.
pub fn plan_destinations(
    files: &[MediaFile],
    settings: &Settings,
    scan: &ScanConfig,
    cancel: &CancellationToken,
) -> Option<Vec<MediaFile>> {
    let mut planned = files.to_vec();
    for file in planned.iter_mut().filter(|f| !f.is_duplicate()) {
        file.reset_destination();
    }

    let Some(root) = settings.reachable_destination() else {
        tracing::debug!(
            target: "planner",
            destination = ?settings.destination,
            "No usable destination, leaving files unplaced"
        );
        return Some(planned);
    };

    let candidates: Vec<Candidate<'_>> = planned
        .iter()
        .filter(|f| !f.is_duplicate())
        .map(|f| Candidate::new(f, settings))
        .collect();
    let probe = FsProbe::new(root, scan.timestamp_tolerance_secs);
    let Some(assignments) = resolve_collisions(candidates, probe, cancel) else {
        tracing::debug!(target: "planner", "Planning cancelled");
        return None;
    };

    let by_source: HashMap<PathBuf, usize> = planned
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.is_duplicate())
        .map(|(idx, f)| (f.source_path.clone(), idx))
        .collect();
    let mut pre_existing = 0usize;

    for assignment in assignments {
        let Some(&idx) = by_source.get(&assignment.source) else {
            continue;
        };
        let file = &mut planned[idx];
        match assignment.placement {
            Placement::New => {
                file.dest_path = Some(root.join(&assignment.relative));
            }
            Placement::AlreadyPresent => {
                file.dest_path = Some(root.join(&assignment.relative));
                file.status = ImportStatus::PreExisting;
                pre_existing += 1;
            }
            Placement::Exhausted => {
                file.fail(format!(
                    "No free destination name for {}",
                    assignment.relative.display()
                ));
            }
        }
    }

    tracing::debug!(
        target: "planner",
        root = %root.display(),
        files = planned.len(),
        pre_existing,
        "Planned destinations"
    );
    Some(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{date, media_file, source_file};
    use filetime::FileTime;
    use tempfile::tempdir;

    fn flat(dest: &Path) -> Settings {
        Settings {
            destination: Some(dest.to_path_buf()),
            organize_by_date: false,
            ..Settings::default()
        }
    }

    #[test]
    fn test_unreachable_destination_leaves_files_unplaced() {
        let mut file = media_file("/card/a.jpg", 10, None);
        file.dest_path = Some("/old/a.jpg".into());
        file.status = ImportStatus::PreExisting;

        let settings = Settings::with_destination("/definitely/not/mounted/here");
        let planned = plan_destinations(&[file], &settings, &ScanConfig::default(), &CancellationToken::new()).unwrap();

        assert_eq!(planned[0].status, ImportStatus::Waiting);
        assert!(planned[0].dest_path.is_none());
    }

    #[test]
    fn test_existing_different_file_gets_suffix() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let file = source_file(src.path(), "photo.jpg", b"new photo bytes", None);
        std::fs::write(dest.path().join("photo.jpg"), b"some other photo").unwrap();

        let planned = plan_destinations(&[file], &flat(dest.path()), &ScanConfig::default(), &CancellationToken::new()).unwrap();

        assert_eq!(planned[0].status, ImportStatus::Waiting);
        assert_eq!(planned[0].dest_path, Some(dest.path().join("photo_1.jpg")));
    }

    #[test]
    fn test_same_name_and_size_is_pre_existing() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let file = source_file(src.path(), "photo.jpg", b"0123456789", None);
        std::fs::write(dest.path().join("photo.jpg"), b"0123456789").unwrap();

        let planned = plan_destinations(&[file], &flat(dest.path()), &ScanConfig::default(), &CancellationToken::new()).unwrap();
        assert_eq!(planned[0].status, ImportStatus::PreExisting);
        assert_eq!(planned[0].dest_path, Some(dest.path().join("photo.jpg")));
    }

    #[test]
    fn test_renamed_copy_matched_by_mtime_within_tolerance() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut file = source_file(src.path(), "IMG_1.JPG", b"abcdef", Some(date("2022-05-01 12:00:00")));
        let mtime = FileTime::from_unix_time(1_650_000_000, 0);
        filetime::set_file_mtime(&file.source_path, mtime).unwrap();
        file.modified_at = std::fs::metadata(&file.source_path).unwrap().modified().ok();

        // Same size, different bytes, mtime off by one second (FAT rounding)
        let settings = Settings {
            rename_by_date: true,
            ..flat(dest.path())
        };
        let existing = dest.path().join("IMG_20220501_120000.JPG");
        std::fs::write(&existing, b"ABCDEF").unwrap();
        filetime::set_file_mtime(&existing, FileTime::from_unix_time(1_650_000_001, 0)).unwrap();

        let planned = plan_destinations(&[file], &settings, &ScanConfig::default(), &CancellationToken::new()).unwrap();
        assert_eq!(planned[0].status, ImportStatus::PreExisting);
    }

    #[test]
    fn test_renamed_copy_matched_by_digest() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let mut file = source_file(src.path(), "IMG_1.JPG", b"identical", Some(date("2022-05-01 12:00:00")));
        file.modified_at = None;

        let settings = Settings {
            rename_by_date: true,
            ..flat(dest.path())
        };
        std::fs::write(dest.path().join("IMG_20220501_120000.JPG"), b"identical").unwrap();

        let planned = plan_destinations(&[file], &settings, &ScanConfig::default(), &CancellationToken::new()).unwrap();
        assert_eq!(planned[0].status, ImportStatus::PreExisting);
    }

    #[test]
    fn test_directory_in_the_way_is_other() {
        let src = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let file = source_file(src.path(), "clip.mov", b"x", None);
        std::fs::create_dir(dest.path().join("clip.mov")).unwrap();

        let planned = plan_destinations(&[file], &flat(dest.path()), &ScanConfig::default(), &CancellationToken::new()).unwrap();
        assert_eq!(planned[0].dest_path, Some(dest.path().join("clip_1.mov")));
    }

    #[test]
    fn test_duplicates_are_untouched() {
        let dest = tempdir().unwrap();
        let mut dup = media_file("/card/b.jpg", 10, None);
        dup.status = ImportStatus::DuplicateInSource;
        dup.duplicate_of = Some("/card/a.jpg".into());

        let planned = plan_destinations(
            std::slice::from_ref(&dup),
            &flat(dest.path()),
            &ScanConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(planned[0], dup);
    }

    #[test]
    fn test_cancelled_planning_returns_none() {
        let dest = tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let files = vec![media_file("/card/a.jpg", 10, None)];
        assert!(plan_destinations(&files, &flat(dest.path()), &ScanConfig::default(), &cancel).is_none());
    }

    #[test]
    fn test_within_tolerance() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        let tol = Duration::from_secs(2);
        assert!(within(base, base + Duration::from_secs(2), tol));
        assert!(within(base + Duration::from_secs(2), base, tol));
        assert!(!within(base, base + Duration::from_secs(3), tol));
    }
}
