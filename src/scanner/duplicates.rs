//! Duplicate-in-source detection.
//!
//! Two files look like duplicates when their sizes are equal and either
//! their capture dates are within tolerance or their names match
//! (case-insensitively). When digest verification is on, a content digest
//! confirms or rejects the match; files whose digest could not be computed
//! keep the heuristic verdict.

use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::ScanConfig;
use crate::hash;
use crate::model::{ImportStatus, MediaFile};

/// Content digests keyed by source path. Paths that could not be hashed
/// are absent.
pub type Digests = HashMap<PathBuf, String>;

fn looks_like_duplicate(a: &MediaFile, b: &MediaFile, config: &ScanConfig) -> bool {
    if a.size_bytes != b.size_bytes {
        return false;
    }
    let dates_match = match (a.capture_date, b.capture_date) {
        (Some(x), Some(y)) => (x - y).num_seconds().abs() <= config.duplicate_date_tolerance_secs,
        _ => false,
    };
    dates_match || a.name.to_lowercase() == b.name.to_lowercase()
}

/// Source paths worth hashing: every file with a heuristic partner.
pub fn hash_candidates(files: &[MediaFile], config: &ScanConfig) -> Vec<PathBuf> {
    if !config.verify_duplicates_with_hash {
        return Vec::new();
    }

    let mut by_size: HashMap<u64, Vec<&MediaFile>> = HashMap::new();
    for file in files.iter().filter(|f| !f.is_duplicate()) {
        by_size.entry(file.size_bytes).or_default().push(file);
    }

    let mut candidates = Vec::new();
    for group in by_size.values().filter(|g| g.len() > 1) {
        for (i, file) in group.iter().enumerate() {
            let has_partner = group
                .iter()
                .enumerate()
                .any(|(j, other)| i != j && looks_like_duplicate(file, other, config));
            if has_partner {
                candidates.push(file.source_path.clone());
            }
        }
    }
    candidates.sort();
    candidates
}

/// Hash files in parallel. Failures are logged and left out.
pub fn compute_digests(paths: Vec<PathBuf>) -> Digests {
    paths
        .into_par_iter()
        .filter_map(|path| match hash::content_digest(&path) {
            Ok(digest) => Some((path, digest)),
            Err(e) => {
                tracing::debug!(target: "scanner", path = %path.display(), error = %e, "Digest failed, using heuristic");
                None
            }
        })
        .collect()
}

/// Mark later occurrences as `DuplicateInSource`. Returns how many were marked.
///
/// Files are visited in source-path order; each file is compared against
/// earlier files that are not duplicates themselves.
pub fn mark_duplicates(files: &mut [MediaFile], config: &ScanConfig, digests: &Digests) -> usize {
    let mut order: Vec<usize> = (0..files.len())
        .filter(|&i| !files[i].is_duplicate())
        .collect();
    order.sort_by(|&a, &b| files[a].source_path.cmp(&files[b].source_path));

    let mut originals: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut marked = 0;

    for idx in order {
        let file = &files[idx];
        let found = originals.get(&file.size_bytes).and_then(|earlier| {
            earlier
                .iter()
                .copied()
                .find(|&o| confirms(file, &files[o], config, digests))
        });

        match found {
            Some(original) => {
                let original_path = files[original].source_path.clone();
                let file = &mut files[idx];
                tracing::debug!(
                    target: "scanner",
                    path = %file.source_path.display(),
                    original = %original_path.display(),
                    "Duplicate in source"
                );
                file.status = ImportStatus::DuplicateInSource;
                file.dest_path = None;
                file.duplicate_of = Some(original_path);
                marked += 1;
            }
            None => originals.entry(file.size_bytes).or_default().push(idx),
        }
    }
    marked
}

fn confirms(file: &MediaFile, original: &MediaFile, config: &ScanConfig, digests: &Digests) -> bool {
    if !looks_like_duplicate(file, original, config) {
        return false;
    }
    if !config.verify_duplicates_with_hash {
        return true;
    }
    match (digests.get(&file.source_path), digests.get(&original.source_path)) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}
