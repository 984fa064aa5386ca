//! Destination path building.
//!
//! Pure path logic, no filesystem access: [`relative_path`] turns a file's
//! metadata and the current [`Settings`] into its ideal location under the
//! destination root, and [`resolve_collisions`] makes those locations unique
//! with `_1`, `_2`, ... suffixes, asking a [`DestinationProbe`] whether a
//! candidate is already occupied.
//!
//! Layout examples:
//! - organize by date: `2024/07/IMG_0042.JPG`
//! - organize + rename: `2024/07/IMG_20240713_184502.JPG`
//! - no capture date: `unknown/IMG_0042.JPG`

use chrono::Datelike;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::model::MediaFile;

/// Highest numeric suffix tried before giving up on a file.
pub const MAX_COLLISION_SUFFIX: u32 = 9999;

/// Folder for files without a capture date when organizing by date.
pub const UNKNOWN_DATE_DIR: &str = "unknown";

/// Ideal destination of a file, relative to the destination root.
pub fn relative_path(file: &MediaFile, settings: &Settings) -> PathBuf {
    let mut path = PathBuf::new();
    if settings.organize_by_date {
        match file.capture_date {
            Some(date) => {
                path.push(format!("{:04}", date.year()));
                path.push(format!("{:02}", date.month()));
            }
            None => path.push(UNKNOWN_DATE_DIR),
        }
    }
    path.push(file_name_for(file, settings));
    path
}

fn file_name_for(file: &MediaFile, settings: &Settings) -> String {
    if settings.rename_by_date
        && let Some(date) = file.capture_date
    {
        let stamp = date.format("%Y%m%d_%H%M%S");
        let prefix = if settings.type_prefix {
            file.media_type.rename_prefix()
        } else {
            None
        };
        let mut name = match prefix {
            Some(prefix) => format!("{prefix}_{stamp}"),
            None => stamp.to_string(),
        };
        if let Some(ext) = file.source_path.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        return sanitize_filename(&name);
    }

    if file.name.is_empty() {
        return "unnamed".to_string();
    }
    sanitize_filename(&file.name)
}

/// Sanitizes a filename by removing/replacing invalid characters
pub fn sanitize_filename(name: &str) -> String {
    // Never let a name act as a path component
    if name == "." || name == ".." {
        return "_".repeat(name.len());
    }
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// What currently sits at a candidate destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    Free,
    /// A file that is the same as the one being placed
    SameFile,
    OccupiedByOther,
}

/// Answers "is this relative destination path taken, and by what?".
pub trait DestinationProbe {
    fn probe(&self, relative: &Path, file: &MediaFile) -> Occupancy;
}

impl<F> DestinationProbe for F
where
    F: Fn(&Path, &MediaFile) -> Occupancy,
{
    fn probe(&self, relative: &Path, file: &MediaFile) -> Occupancy {
        self(relative, file)
    }
}

/// Outcome of placing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Nothing there yet; the file will be copied
    New,
    /// The same file is already at this path
    AlreadyPresent,
    /// Every suffix up to [`MAX_COLLISION_SUFFIX`] is taken
    Exhausted,
}

/// A resolved destination for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub source: PathBuf,
    pub relative: PathBuf,
    pub placement: Placement,
}

/// A file together with its ideal relative path.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub file: &'a MediaFile,
    pub ideal: PathBuf,
}

impl<'a> Candidate<'a> {
    pub fn new(file: &'a MediaFile, settings: &Settings) -> Self {
        Self {
            file,
            ideal: relative_path(file, settings),
        }
    }
}

/// Assigns unique destinations one file at a time.
///
/// Paths handed out within a batch are compared case-insensitively, so two
/// files never land on names that collide on case-insensitive volumes.
pub struct CollisionResolver<P> {
    probe: P,
    taken: HashSet<String>,
}

impl<P: DestinationProbe> CollisionResolver<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            taken: HashSet::new(),
        }
    }

    /// Place a file at its ideal path or the first free suffixed variant.
    ///
    /// Callers must feed files in source-path order for stable results.
    pub fn assign(&mut self, file: &MediaFile, ideal: &Path) -> Assignment {
        for suffix in 0..=MAX_COLLISION_SUFFIX {
            let candidate = with_suffix(ideal, suffix);
            let key = batch_key(&candidate);
            if self.taken.contains(&key) {
                continue;
            }

            let placement = match self.probe.probe(&candidate, file) {
                Occupancy::Free => Placement::New,
                Occupancy::SameFile => Placement::AlreadyPresent,
                Occupancy::OccupiedByOther => continue,
            };
            self.taken.insert(key);
            return Assignment {
                source: file.source_path.clone(),
                relative: candidate,
                placement,
            };
        }

        tracing::warn!(
            target: "planner",
            path = %ideal.display(),
            "No free destination name after {} attempts",
            MAX_COLLISION_SUFFIX
        );
        Assignment {
            source: file.source_path.clone(),
            relative: ideal.to_path_buf(),
            placement: Placement::Exhausted,
        }
    }
}

/// Resolve a whole batch. Candidates are processed in source-path order,
/// so the result does not depend on input order. Returns `None` if
/// cancelled part way.
pub fn resolve_collisions<P: DestinationProbe>(
    mut candidates: Vec<Candidate<'_>>,
    probe: P,
    cancel: &CancellationToken,
) -> Option<Vec<Assignment>> {
    candidates.sort_by(|a, b| a.file.source_path.cmp(&b.file.source_path));
    let mut resolver = CollisionResolver::new(probe);
    candidates
        .iter()
        .map(|c| (!cancel.is_cancelled()).then(|| resolver.assign(c.file, &c.ideal)))
        .collect()
}

/// `dir/name.ext` -> `dir/name_N.ext` (suffix 0 is the path itself)
fn with_suffix(path: &Path, suffix: u32) -> PathBuf {
    if suffix == 0 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    };
    path.with_file_name(name)
}

fn batch_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaType;
    use crate::test_utils::{date, media_file};
    use std::collections::HashMap;

    fn settings(organize: bool, rename: bool) -> Settings {
        Settings {
            destination: Some(PathBuf::from("/dest")),
            organize_by_date: organize,
            rename_by_date: rename,
            ..Settings::default()
        }
    }

    /// In-memory destination: lowercase relative path -> occupancy
    fn occupied(entries: &[(&str, Occupancy)]) -> impl Fn(&Path, &MediaFile) -> Occupancy {
        let map: HashMap<String, Occupancy> = entries
            .iter()
            .map(|(p, o)| (p.to_lowercase(), *o))
            .collect();
        move |path: &Path, _: &MediaFile| {
            map.get(&batch_key(path)).copied().unwrap_or(Occupancy::Free)
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("AC/DC"), "AC_DC");
        assert_eq!(sanitize_filename("Trip: Day 1"), "Trip_ Day 1");
        assert_eq!(sanitize_filename("IMG_0001.JPG"), "IMG_0001.JPG");
        assert_eq!(sanitize_filename("what?"), "what_");
        assert_eq!(sanitize_filename("a<b>c"), "a_b_c");
        assert_eq!(sanitize_filename("pipe|test"), "pipe_test");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_relative_path_organized_by_date() {
        let file = media_file("/card/DCIM/IMG_0042.JPG", 10, Some(date("2024-07-13 18:45:02")));
        assert_eq!(
            relative_path(&file, &settings(true, false)),
            PathBuf::from("2024/07/IMG_0042.JPG")
        );
    }

    #[test]
    fn test_relative_path_renamed_keeps_extension_case() {
        let file = media_file("/card/DCIM/IMG_0042.JPG", 10, Some(date("2024-07-13 18:45:02")));
        assert_eq!(
            relative_path(&file, &settings(true, true)),
            PathBuf::from("2024/07/IMG_20240713_184502.JPG")
        );

        let mut plain = settings(false, true);
        plain.type_prefix = false;
        assert_eq!(
            relative_path(&file, &plain),
            PathBuf::from("20240713_184502.JPG")
        );
    }

    #[test]
    fn test_relative_path_prefix_follows_media_type() {
        let mut clip = media_file("/card/clip.MOV", 10, Some(date("2023-01-02 03:04:05")));
        clip.media_type = MediaType::Video;
        assert_eq!(
            relative_path(&clip, &settings(false, true)),
            PathBuf::from("VID_20230102_030405.MOV")
        );
    }

    #[test]
    fn test_relative_path_without_date() {
        let file = media_file("/card/DSC_1.NEF", 10, None);
        assert_eq!(
            relative_path(&file, &settings(true, true)),
            PathBuf::from("unknown/DSC_1.NEF")
        );
        assert_eq!(
            relative_path(&file, &settings(false, false)),
            PathBuf::from("DSC_1.NEF")
        );
    }

    #[test]
    fn test_existing_different_file_gets_suffix() {
        let file = media_file("/card/photo.jpg", 10, None);
        let probe = occupied(&[("photo.jpg", Occupancy::OccupiedByOther)]);

        let assignments = resolve_collisions(
            vec![Candidate::new(&file, &settings(false, false))],
            probe,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(assignments[0].relative, PathBuf::from("photo_1.jpg"));
        assert_eq!(assignments[0].placement, Placement::New);
    }

    #[test]
    fn test_same_file_is_already_present() {
        let file = media_file("/card/photo.jpg", 10, None);
        let probe = occupied(&[("photo.jpg", Occupancy::SameFile)]);

        let assignments = resolve_collisions(
            vec![Candidate::new(&file, &settings(false, false))],
            probe,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(assignments[0].relative, PathBuf::from("photo.jpg"));
        assert_eq!(assignments[0].placement, Placement::AlreadyPresent);
    }

    #[test]
    fn test_batch_collisions_are_case_insensitive() {
        let a = media_file("/card/a/IMG_1.JPG", 10, None);
        let b = media_file("/card/b/img_1.jpg", 20, None);
        let s = settings(false, false);

        let assignments = resolve_collisions(
            vec![Candidate::new(&b, &s), Candidate::new(&a, &s)],
            occupied(&[]),
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(assignments[0].source, PathBuf::from("/card/a/IMG_1.JPG"));
        assert_eq!(assignments[0].relative, PathBuf::from("IMG_1.JPG"));
        assert_eq!(assignments[1].relative, PathBuf::from("img_1_1.jpg"));
    }

    #[test]
    fn test_cancelled_resolution_returns_none() {
        let file = media_file("/card/photo.jpg", 10, None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = resolve_collisions(
            vec![Candidate::new(&file, &settings(false, false))],
            occupied(&[]),
            &cancel,
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_suffix_without_extension() {
        assert_eq!(with_suffix(Path::new("2024/01/README"), 3), PathBuf::from("2024/01/README_3"));
        assert_eq!(with_suffix(Path::new("a.tar.gz"), 1), PathBuf::from("a.tar_1.gz"));
    }

    #[test]
    fn test_exhausted_when_everything_is_taken() {
        let file = media_file("/card/photo.jpg", 10, None);
        let mut resolver = CollisionResolver::new(|_: &Path, _: &MediaFile| Occupancy::OccupiedByOther);

        let assignment = resolver.assign(&file, Path::new("photo.jpg"));
        assert_eq!(assignment.placement, Placement::Exhausted);
    }
}
