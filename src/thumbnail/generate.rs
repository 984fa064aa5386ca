//! Preview generation.
//!
//! Sources, by media type:
//! - Images: decoded with the `image` crate
//! - RAW files: the largest decodable embedded JPEG preview
//! - Audio: embedded cover art (front cover preferred)
//! - Video: none
//!
//! Every preview is scaled to fit the target box and re-encoded as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use lofty::file::TaggedFileExt;
use lofty::picture::PictureType;
use lofty::probe::Probe;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::model::MediaType;

/// JPEG quality for stored previews
const PREVIEW_QUALITY: u8 = 80;

/// How much of a RAW file to search for embedded previews
const RAW_SEARCH_BYTES: u64 = 16 * 1024 * 1024;

/// Embedded JPEGs smaller than this are usually tiny EXIF thumbnails
const MIN_EMBEDDED_JPEG: usize = 4 * 1024;

const JPEG_START: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Generate JPEG preview bytes for a file, or `None` if no preview can be made.
pub fn generate_preview(path: &Path, media_type: MediaType, size: u32) -> Option<Vec<u8>> {
    let image = match media_type {
        MediaType::Image => match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                tracing::debug!(target: "thumbnail", path = %path.display(), error = %e, "Image decode failed");
                return None;
            }
        },
        MediaType::RawImage => decode_embedded_raw_preview(path)?,
        MediaType::Audio => decode_embedded_cover(path)?,
        MediaType::Video | MediaType::Unknown => return None,
    };
    encode_preview(&image, size)
}

/// Scale to fit `size`x`size` and encode as JPEG.
pub fn encode_preview(image: &DynamicImage, size: u32) -> Option<Vec<u8>> {
    let scaled = image.thumbnail(size, size);
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(scaled.to_rgb8());

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, PREVIEW_QUALITY);
    rgb.write_with_encoder(encoder).ok()?;
    Some(buffer)
}

fn decode_embedded_raw_preview(path: &Path) -> Option<DynamicImage> {
    let file = File::open(path).ok()?;
    let mut data = Vec::new();
    file.take(RAW_SEARCH_BYTES).read_to_end(&mut data).ok()?;

    let mut candidates = embedded_jpegs(&data);
    // Largest first: that's the full-size preview, not the EXIF thumbnail
    candidates.sort_by(|a, b| b.len().cmp(&a.len()));

    candidates
        .into_iter()
        .filter(|jpeg| jpeg.len() >= MIN_EMBEDDED_JPEG)
        .find_map(|jpeg| image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).ok())
}

/// Find JPEG streams (SOI..EOI) inside a byte buffer.
///
/// Marker segments are skipped by their declared length, so an EXIF
/// thumbnail nested in an APP1 segment does not end the outer stream.
pub(crate) fn embedded_jpegs(data: &[u8]) -> Vec<&[u8]> {
    let mut found = Vec::new();
    let mut offset = 0;
    while let Some(start) = data
        .get(offset..)
        .and_then(|rest| find(rest, &JPEG_START))
        .map(|p| p + offset)
    {
        match jpeg_len(&data[start..]) {
            Some(len) => {
                found.push(&data[start..start + len]);
                offset = start + len;
            }
            None => offset = start + JPEG_START.len() - 1,
        }
    }
    found
}

/// Length of the JPEG stream starting at `data[0]`, through its EOI marker.
fn jpeg_len(data: &[u8]) -> Option<usize> {
    let mut pos = 2;
    loop {
        if *data.get(pos)? != 0xFF {
            return None;
        }
        // Fill bytes may precede a marker
        while *data.get(pos + 1)? == 0xFF {
            pos += 1;
        }
        let marker = *data.get(pos + 1)?;
        pos += 2;
        match marker {
            0xD9 => return Some(pos),
            0x01 | 0xD0..=0xD7 => {}
            _ => {
                let len = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
                if len < 2 {
                    return None;
                }
                pos += len;
                // Start of scan: entropy-coded data follows the header
                if marker == 0xDA {
                    pos = skip_entropy_data(data, pos)?;
                }
            }
        }
    }
}

/// Offset of the first real marker at or after `pos`.
fn skip_entropy_data(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        pos += data.get(pos..)?.iter().position(|&b| b == 0xFF)?;
        match *data.get(pos + 1)? {
            // Stuffed zero byte or restart marker
            0x00 | 0xD0..=0xD7 => pos += 2,
            0xFF => pos += 1,
            _ => return Some(pos),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_embedded_cover(path: &Path) -> Option<DynamicImage> {
    let tagged_file = Probe::open(path).ok()?.read().ok()?;
    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())?;

    let pictures = tag.pictures();
    let picture = pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())?;

    image::load_from_memory(picture.data()).ok()
}
