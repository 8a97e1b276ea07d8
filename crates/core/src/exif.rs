use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use exif::{In, Reader, Tag, Value};

use crate::domain::{Coordinate, PhotoMetadata};

/// Source of per-photo location and capture time.
///
/// Implementations must not touch the network and must not fail: anything
/// unreadable comes back as all-absent fields.
pub trait MetadataReader: Send + Sync {
    fn extract(&self, path: &Path) -> PhotoMetadata;
}

/// Reads GPS position and capture time from embedded EXIF tags.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifReader;

impl MetadataReader for ExifReader {
    fn extract(&self, path: &Path) -> PhotoMetadata {
        let exif = match read_exif(path) {
            Some(e) => e,
            None => return PhotoMetadata::default(),
        };

        let captured_at = exif
            .get_field(Tag::DateTimeOriginal, In::PRIMARY)
            .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))
            .and_then(|f| ascii_value(&f.value))
            .and_then(|s| parse_capture_time(&s));

        PhotoMetadata {
            coordinate: gps_coordinate(&exif),
            captured_at,
        }
    }
}

fn read_exif(path: &Path) -> Option<exif::Exif> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => Some(exif),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "no readable EXIF");
            None
        }
    }
}

fn gps_coordinate(exif: &exif::Exif) -> Option<Coordinate> {
    let lat = gps_axis(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef)?;
    let lon = gps_axis(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef)?;
    let coordinate = Coordinate::new(lat, lon);
    coordinate.is_valid().then_some(coordinate)
}

fn gps_axis(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let dms: Vec<f64> = match &exif.get_field(value_tag, In::PRIMARY)?.value {
        Value::Rational(parts) => parts.iter().map(|r| r.to_f64()).collect(),
        _ => return None,
    };
    let reference = ascii_value(&exif.get_field(ref_tag, In::PRIMARY)?.value)?;
    dms_to_decimal(&dms, &reference)
}

fn ascii_value(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(parts) => parts.first().map(|bytes| {
            String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .trim()
                .to_string()
        }),
        _ => None,
    }
}

/// Convert degrees/minutes/seconds plus an N/S/E/W reference to signed decimal degrees.
pub fn dms_to_decimal(dms: &[f64], reference: &str) -> Option<f64> {
    if dms.is_empty() || dms.len() > 3 || dms.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let degrees = dms[0];
    let minutes = dms.get(1).copied().unwrap_or(0.0);
    let seconds = dms.get(2).copied().unwrap_or(0.0);
    let decimal = degrees + minutes / 60.0 + seconds / 3600.0;

    match reference.trim().to_ascii_uppercase().as_str() {
        "S" | "W" => Some(-decimal),
        "N" | "E" => Some(decimal),
        _ => None,
    }
}

/// Parse an EXIF date string into a timestamp.
/// Handles both "2024-01-15 12:00:00" (display_value) and "2024:01:15 12:00:00" (raw EXIF).
/// A missing or unparsable time part falls back to midnight.
pub fn parse_capture_time(date_str: &str) -> Option<NaiveDateTime> {
    let mut parts = date_str.split_whitespace();
    let date_part = parts.next()?;
    let fields: Vec<&str> = date_part.split([':', '-']).collect();
    if fields.len() < 3 {
        return None;
    }
    let year: i32 = fields[0].parse().ok()?;
    let month: u32 = fields[1].parse().ok()?;
    let day: u32 = fields[2].parse().ok()?;

    // Cameras with an unset clock write "0000:00:00".
    if !(1800..=2100).contains(&year) {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    let time = parts
        .next()
        .and_then(|t| {
            let hms: Vec<u32> = t
                .split(':')
                .map(|v| v.split('.').next().unwrap_or(v).parse().ok())
                .collect::<Option<Vec<_>>>()?;
            match hms.as_slice() {
                [h, m, s] => chrono::NaiveTime::from_hms_opt(*h, *m, *s),
                [h, m] => chrono::NaiveTime::from_hms_opt(*h, *m, 0),
                _ => None,
            }
        })
        .unwrap_or_default();

    Some(date.and_time(time))
}
