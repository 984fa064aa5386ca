//! Capture date extraction.
//!
//! Uses kamadak-exif for still images (JPEG, TIFF-based RAW, HEIF, PNG,
//! WebP) and lofty for audio recording dates. Anything without an
//! embedded date falls back to the filesystem modification time.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::model::MediaType;

/// EXIF tags to try, most specific first.
const EXIF_DATE_TAGS: [exif::Tag; 3] = [
    exif::Tag::DateTimeOriginal,
    exif::Tag::DateTimeDigitized,
    exif::Tag::DateTime,
];

/// Best-available capture date for a file.
///
/// Never fails: extraction errors degrade to the modification time.
pub fn capture_date(
    path: &Path,
    media_type: MediaType,
    modified_at: Option<SystemTime>,
) -> Option<NaiveDateTime> {
    match read_embedded_date(path, media_type) {
        Ok(Some(date)) => return Some(date),
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(target: "metadata", path = %path.display(), error = %e, "No embedded date, using mtime");
        }
    }
    modified_at.map(system_time_to_local)
}

/// Read a date embedded in the file itself.
pub fn read_embedded_date(path: &Path, media_type: MediaType) -> Result<Option<NaiveDateTime>> {
    match media_type {
        MediaType::Image | MediaType::RawImage => read_exif_date(path),
        MediaType::Audio => read_audio_date(path),
        MediaType::Video | MediaType::Unknown => Ok(None),
    }
}

fn read_exif_date(path: &Path) -> Result<Option<NaiveDateTime>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new()
        .read_from_container(&mut reader)
        .map_err(|e| Error::metadata(path, e.to_string()))?;

    for tag in EXIF_DATE_TAGS {
        let Some(field) = exif.get_field(tag, exif::In::PRIMARY) else {
            continue;
        };
        if let exif::Value::Ascii(ref values) = field.value
            && let Some(raw) = values.first()
            && let Ok(dt) = exif::DateTime::from_ascii(raw)
            && let Some(date) = exif_to_naive(&dt)
        {
            return Ok(Some(date));
        }
    }
    Ok(None)
}

fn exif_to_naive(dt: &exif::DateTime) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?.and_hms_opt(
        dt.hour.into(),
        dt.minute.into(),
        dt.second.into(),
    )
}

fn read_audio_date(path: &Path) -> Result<Option<NaiveDateTime>> {
    let tagged_file = Probe::open(path)
        .map_err(|e| Error::metadata(path, e.to_string()))?
        .read()
        .map_err(|e| Error::metadata(path, e.to_string()))?;

    let Some(tag) = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
    else {
        return Ok(None);
    };

    if let Some(date) = tag
        .get_string(&ItemKey::RecordingDate)
        .and_then(parse_tag_date)
    {
        return Ok(Some(date));
    }

    Ok(tag
        .year()
        .and_then(|y| NaiveDate::from_ymd_opt(y as i32, 1, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Parse the date formats commonly found in audio tags.
pub(crate) fn parse_tag_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    value
        .get(..4)
        .and_then(|y| y.parse::<i32>().ok())
        .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Convert a filesystem timestamp to local wall-clock time.
pub fn system_time_to_local(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Minimal little-endian TIFF with a single IFD0 `DateTime` entry.
    fn tiff_with_date(date: &str) -> Vec<u8> {
        let mut value = date.as_bytes().to_vec();
        value.push(0);
        let mut data = Vec::new();
        data.extend_from_slice(b"II");
        data.extend_from_slice(&42u16.to_le_bytes());
        data.extend_from_slice(&8u32.to_le_bytes());
        // IFD0: one entry
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&0x0132u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&(value.len() as u32).to_le_bytes());
        data.extend_from_slice(&26u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&value);
        data
    }

    #[test]
    fn test_reads_exif_date_from_tiff() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.tif");
        std::fs::write(&path, tiff_with_date("2021:06:15 10:30:45")).unwrap();

        let date = read_embedded_date(&path, MediaType::Image).unwrap().unwrap();
        assert_eq!(date.to_string(), "2021-06-15 10:30:45");
    }

    #[test]
    fn test_falls_back_to_mtime_for_bogus_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();

        let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        let date = capture_date(&path, MediaType::Image, Some(mtime));
        assert_eq!(date, Some(system_time_to_local(mtime)));
    }

    #[test]
    fn test_video_uses_mtime() {
        let mtime = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_500_000_000);
        let date = capture_date(Path::new("/nowhere/clip.mp4"), MediaType::Video, Some(mtime));
        assert_eq!(date, Some(system_time_to_local(mtime)));
    }

    #[test]
    fn test_no_date_at_all() {
        assert_eq!(
            capture_date(Path::new("/nowhere/clip.mp4"), MediaType::Video, None),
            None
        );
    }

    #[test]
    fn test_parse_tag_date_formats() {
        assert_eq!(
            parse_tag_date("2019-03-04T05:06:07").unwrap().to_string(),
            "2019-03-04 05:06:07"
        );
        assert_eq!(
            parse_tag_date("2019-03-04").unwrap().to_string(),
            "2019-03-04 00:00:00"
        );
        assert_eq!(
            parse_tag_date("1999").unwrap().to_string(),
            "1999-01-01 00:00:00"
        );
        assert!(parse_tag_date("someday").is_none());
    }
}
