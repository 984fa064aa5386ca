//! Content digests for duplicate and pre-existing detection.
//!
//! Streams the whole file through SHA-256, so two files only compare equal
//! when every byte matches.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 256 * 1024;

/// Compute the SHA-256 digest of a file's full content.
///
/// The file size is hashed first, so files of different sizes never collide.
///
/// # Returns
///
/// SHA256 hash as a lowercase hex string (64 characters)
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub fn content_digest(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    let mut hasher = Sha256::new();
    hasher.update(file_size.to_le_bytes());

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether two files have identical content.
pub fn same_content(a: &Path, b: &Path) -> std::io::Result<bool> {
    if a.metadata()?.len() != b.metadata()?.len() {
        return Ok(false);
    }
    Ok(content_digest(a)? == content_digest(b)?)
}
