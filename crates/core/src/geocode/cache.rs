use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::domain::{Coordinate, PhotoRecord};
use crate::error::Result;

const CACHE_FORMAT_VERSION: u32 = 1;

/// Default quantization: 5 decimal places, roughly one meter.
pub const DEFAULT_PRECISION: u32 = 5;

/// A coordinate rounded to a fixed number of decimal places, as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeocodeKey {
    pub lat: i64,
    pub lon: i64,
}

impl GeocodeKey {
    pub fn quantize(coordinate: Coordinate, precision: u32) -> Self {
        let factor = 10f64.powi(precision as i32);
        Self {
            lat: (coordinate.latitude * factor).round() as i64,
            lon: (coordinate.longitude * factor).round() as i64,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    precision: u32,
    entries: Vec<CacheEntry>,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    lat: i64,
    lon: i64,
    place: String,
}

/// Quantized coordinate → place name, shared by every folder.
///
/// Only successful lookups are persisted. Failed keys are remembered for the
/// lifetime of the process so the same spot is not retried within one run.
#[derive(Debug, Clone)]
pub struct GeocodeCache {
    precision: u32,
    places: HashMap<GeocodeKey, String>,
    failed: HashSet<GeocodeKey>,
    dirty: bool,
}

impl GeocodeCache {
    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            places: HashMap::new(),
            failed: HashSet::new(),
            dirty: false,
        }
    }

    /// Load a persisted cache. Absent, corrupt, or differently-quantized files yield an empty cache.
    pub fn load(path: &Path, precision: u32) -> Self {
        let mut cache = Self::new(precision);
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(_) => return cache,
        };

        let file: CacheFile = match serde_json::from_slice(&bytes) {
            Ok(f) => f,
            Err(err) => {
                tracing::warn!(cache = %path.display(), error = %err, "ignoring corrupt geocode cache");
                return cache;
            }
        };
        if file.version != CACHE_FORMAT_VERSION || file.precision != precision {
            tracing::info!(
                cache = %path.display(),
                stored_precision = file.precision,
                precision,
                "geocode cache quantized differently, starting empty"
            );
            return cache;
        }

        cache.places = file
            .entries
            .into_iter()
            .map(|e| (GeocodeKey { lat: e.lat, lon: e.lon }, e.place))
            .collect();
        cache
    }

    /// Persist successful lookups atomically, sorted by key for stable output.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let mut entries: Vec<CacheEntry> = self
            .places
            .iter()
            .map(|(k, place)| CacheEntry {
                lat: k.lat,
                lon: k.lon,
                place: place.clone(),
            })
            .collect();
        entries.sort_by_key(|e| (e.lat, e.lon));

        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            precision: self.precision,
            entries,
        };
        atomic::write_bytes(path, &serde_json::to_vec_pretty(&file)?)?;
        self.dirty = false;
        Ok(())
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn key(&self, coordinate: Coordinate) -> GeocodeKey {
        GeocodeKey::quantize(coordinate, self.precision)
    }

    pub fn get(&self, coordinate: Coordinate) -> Option<&str> {
        self.places.get(&self.key(coordinate)).map(String::as_str)
    }

    pub fn insert(&mut self, coordinate: Coordinate, place: &str) {
        let key = self.key(coordinate);
        self.failed.remove(&key);
        if self.places.get(&key).map(String::as_str) != Some(place) {
            self.places.insert(key, place.to_string());
            self.dirty = true;
        }
    }

    pub fn has_failed(&self, coordinate: Coordinate) -> bool {
        self.failed.contains(&self.key(coordinate))
    }

    pub fn mark_failed(&mut self, coordinate: Coordinate) {
        let key = self.key(coordinate);
        self.failed.insert(key);
    }

    /// Forget in-process failures so a rebuild retries them.
    pub fn clear_failures(&mut self) {
        self.failed.clear();
    }

    /// Learn places from records that were already resolved. Returns how many keys were new.
    pub fn seed_from(&mut self, records: &[PhotoRecord]) -> usize {
        let mut learned = 0;
        for record in records {
            if let (Some(coordinate), Some(place)) = (record.coordinate, record.place_name()) {
                let key = self.key(coordinate);
                if !self.places.contains_key(&key) {
                    self.places.insert(key, place.to_string());
                    learned += 1;
                }
            }
        }
        if learned > 0 {
            self.dirty = true;
        }
        learned
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
