//! Blocking file operations used by the import pipeline.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::config::ImportConfig;
use crate::error::{Error, Result};

const BUFFER_SIZE: usize = 256 * 1024;

/// Copy `source` to a new file at `dest`.
///
/// Never overwrites: fails if `dest` already exists. Files at least
/// `large_file_threshold` bytes check for cancellation every
/// `cancel_check_interval` bytes; a cancelled or failed copy removes its
/// partial artifact. Returns the number of bytes written.
pub fn copy_to_new(
    source: &Path,
    dest: &Path,
    expected_size: u64,
    config: &ImportConfig,
    cancel: &CancellationToken,
) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::copy_failed(dest, e))?;
    }

    let src_file = File::open(source).map_err(|e| Error::copy_failed(source, e))?;
    let dest_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| Error::copy_failed(dest, e))?;

    let check_every = (expected_size >= config.large_file_threshold)
        .then_some(config.cancel_check_interval.max(1));

    match stream_copy(src_file, dest_file, check_every, cancel) {
        Ok(copied) => Ok(copied),
        Err(e) => {
            // Only ever removes the file this call created
            if let Err(remove_err) = fs::remove_file(dest) {
                tracing::warn!(target: "import", path = %dest.display(), error = %remove_err, "Could not remove partial copy");
            }
            Err(match e {
                Error::Io(io) => Error::copy_failed(dest, io),
                other => other,
            })
        }
    }
}

fn stream_copy(
    source: File,
    dest: File,
    check_every: Option<u64>,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut copied = 0u64;
    let mut since_check = 0u64;
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
        copied += bytes_read as u64;

        if let Some(interval) = check_every {
            since_check += bytes_read as u64;
            if since_check >= interval {
                since_check = 0;
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }
        }
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(copied)
}

/// Give `dest` the source's access and modification times.
pub fn preserve_timestamps(source: &Path, dest: &Path) -> std::io::Result<()> {
    let meta = fs::metadata(source)?;
    let atime = filetime::FileTime::from_last_access_time(&meta);
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(dest, atime, mtime)
}

/// Where a sidecar lands next to an imported file.
///
/// The sidecar follows the file's new name: `IMG_0042.XMP` next to
/// `IMG_20240713_184502.JPG` becomes `IMG_20240713_184502.XMP`, and
/// `DSC_2.NEF.xmp` keeps its double extension.
pub fn sidecar_destination(source: &Path, dest: &Path, sidecar: &Path) -> Option<PathBuf> {
    let sidecar_name = sidecar.file_name()?.to_string_lossy().into_owned();
    let dest_name = dest.file_name()?.to_string_lossy().into_owned();
    let dest_stem = dest.file_stem()?.to_string_lossy().into_owned();

    let lower = sidecar_name.to_lowercase();
    let source_name = source.file_name()?.to_string_lossy().to_lowercase();
    let source_stem = source.file_stem()?.to_string_lossy().to_lowercase();

    let new_name = if lower.len() > source_name.len()
        && lower.starts_with(&source_name)
        && let Some(rest) = sidecar_name.get(source_name.len()..)
    {
        format!("{dest_name}{rest}")
    } else if lower.starts_with(&source_stem)
        && let Some(rest) = sidecar_name.get(source_stem.len()..)
    {
        format!("{dest_stem}{rest}")
    } else {
        sidecar_name
    };
    Some(dest.with_file_name(new_name))
}

/// Outcome of bringing sidecars along with an imported file.
#[derive(Debug, Default, PartialEq)]
pub struct SidecarCopy {
    /// Sidecars whose exact content is now at the destination
    pub present: Vec<PathBuf>,
    /// One message per sidecar that did not make it across
    pub problems: Vec<String>,
}

/// Copy sidecars next to `dest`, best effort.
///
/// An existing file at a sidecar's target is never overwritten. It only
/// counts as the sidecar being present when its content is identical;
/// otherwise the source sidecar is reported and must be kept.
pub fn copy_sidecars(source: &Path, dest: &Path, sidecars: &[PathBuf]) -> SidecarCopy {
    let mut outcome = SidecarCopy::default();
    for sidecar in sidecars {
        let Some(target) = sidecar_destination(source, dest, sidecar) else {
            continue;
        };
        match copy_sidecar(sidecar, &target) {
            Ok(()) => outcome.present.push(sidecar.clone()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                match crate::hash::same_content(sidecar, &target) {
                    Ok(true) => {
                        tracing::debug!(target: "import", path = %target.display(), "Sidecar already at destination");
                        outcome.present.push(sidecar.clone());
                    }
                    Ok(false) => {
                        tracing::warn!(target: "import", path = %target.display(), "Different sidecar already at destination");
                        outcome.problems.push(format!(
                            "Sidecar {} kept: {} already exists with other content",
                            sidecar.display(),
                            target.display()
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(target: "import", path = %target.display(), error = %e, "Could not compare sidecars");
                        outcome.problems.push(format!("Sidecar {} kept: {e}", sidecar.display()));
                    }
                }
            }
            Err(e) => {
                tracing::warn!(target: "import", path = %sidecar.display(), error = %e, "Sidecar copy failed");
                outcome.problems.push(format!("Sidecar {} not copied: {e}", sidecar.display()));
            }
        }
    }
    outcome
}

fn copy_sidecar(sidecar: &Path, target: &Path) -> std::io::Result<()> {
    let mut from = File::open(sidecar)?;
    let mut to = OpenOptions::new().write(true).create_new(true).open(target)?;
    if let Err(e) = std::io::copy(&mut from, &mut to) {
        drop(to);
        let _ = fs::remove_file(target);
        return Err(e);
    }
    Ok(())
}

/// Delete an imported original and the given sidecars.
///
/// Returns one message per file that could not be removed.
pub fn delete_originals(source: &Path, sidecars: &[PathBuf]) -> Vec<String> {
    std::iter::once(source)
        .chain(sidecars.iter().map(PathBuf::as_path))
        .filter_map(|path| {
            fs::remove_file(path)
                .err()
                .map(|e| Error::delete_failed(path, e).to_string())
        })
        .collect()
}
