use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build a coordinate from two optional columns. Both must be present.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Some(Self::new(lat, lon)),
            _ => None,
        }
    }

    /// Finite and inside the [-90, 90] x [-180, 180] range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

/// Reverse-geocoding state of a single photo.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Geocode {
    /// No successful lookup yet; picked up by the next analysis run.
    #[default]
    Pending,
    /// Resolved place name, e.g. "Lyon, France".
    Resolved(String),
    /// Lookup gave up. Only retried by a rebuild analysis.
    Unresolved,
}

impl Geocode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Geocode::Pending => "pending",
            Geocode::Resolved(_) => "resolved",
            Geocode::Unresolved => "unresolved",
        }
    }

    pub fn place_name(&self) -> Option<&str> {
        match self {
            Geocode::Resolved(name) => Some(name),
            _ => None,
        }
    }

    /// Rebuild a state from its persisted `(state, place_name)` columns.
    /// Unknown states and a "resolved" row without a name decode as `Pending`.
    pub fn from_columns(state: &str, place_name: Option<String>) -> Self {
        match (state, place_name) {
            ("resolved", Some(name)) if !name.is_empty() => Geocode::Resolved(name),
            ("unresolved", _) => Geocode::Unresolved,
            _ => Geocode::Pending,
        }
    }
}

/// Change-detection summary of a photo file.
///
/// `sha256` is the content identity; `size` and `mtime_ns` only serve as a
/// fast path that lets an unchanged file skip re-hashing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime_ns: i64,
    pub sha256: String,
}

impl Fingerprint {
    /// True when size and mtime both match, so the stored digest can be trusted.
    pub fn same_stat(&self, size: u64, mtime_ns: i64) -> bool {
        self.size == size && self.mtime_ns == mtime_ns
    }

    /// Placeholder for files that could not be read at all.
    pub fn is_empty(&self) -> bool {
        self.sha256.is_empty()
    }
}

/// One photo and everything learned about it.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    pub path: PathBuf,
    pub coordinate: Option<Coordinate>,
    pub captured_at: Option<NaiveDateTime>,
    pub geocode: Geocode,
    /// Absolute folder in a folder cache, root-relative in the combined dataset.
    pub source_folder: PathBuf,
    pub fingerprint: Fingerprint,
}

impl PhotoRecord {
    /// A record with no metadata, as produced for unreadable files.
    pub fn empty(path: &Path, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.to_path_buf(),
            coordinate: None,
            captured_at: None,
            geocode: Geocode::Pending,
            source_folder: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            fingerprint,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn place_name(&self) -> Option<&str> {
        self.geocode.place_name()
    }

    /// Located and never successfully (or definitively un-) geocoded.
    pub fn needs_geocoding(&self) -> bool {
        self.coordinate.is_some() && self.geocode == Geocode::Pending
    }
}

/// Metadata returned by a [`crate::exif::MetadataReader`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub coordinate: Option<Coordinate>,
    pub captured_at: Option<NaiveDateTime>,
}
