use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::error::Result;

pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Size and mtime of one folder cache file when the combined store was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheFingerprint {
    pub size: u64,
    pub mtime_ns: i64,
}

impl CacheFingerprint {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let (size, mtime_ns) = crate::fingerprint::stat(path)?;
        Ok(Self { size, mtime_ns })
    }
}

/// Record of which folder caches went into the combined store, keyed by
/// path relative to the root (always `/`-separated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub built_at: DateTime<Utc>,
    pub entries: BTreeMap<String, CacheFingerprint>,
}

impl Manifest {
    pub fn new(entries: BTreeMap<String, CacheFingerprint>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            built_at: Utc::now(),
            entries,
        }
    }

    /// Read a manifest; `None` when absent, unparsable or of another version.
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(m) if m.version == MANIFEST_VERSION => Some(m),
            Ok(m) => {
                tracing::info!(manifest = %path.display(), version = m.version, "manifest version differs");
                None
            }
            Err(err) => {
                tracing::warn!(manifest = %path.display(), error = %err, "ignoring corrupt manifest");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic::write_bytes(path, &serde_json::to_vec_pretty(self)?)
    }

    /// True when `current` lists exactly the recorded caches with identical fingerprints.
    pub fn matches(&self, current: &BTreeMap<String, CacheFingerprint>) -> bool {
        &self.entries == current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> BTreeMap<String, CacheFingerprint> {
        BTreeMap::from([
            ("2023/.photomap_cache.sqlite".to_string(), CacheFingerprint { size: 8192, mtime_ns: 1 }),
            ("2024/.photomap_cache.sqlite".to_string(), CacheFingerprint { size: 4096, mtime_ns: 2 }),
        ])
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(MANIFEST_FILE_NAME);
        let manifest = Manifest::new(entries());
        manifest.save(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert!(loaded.matches(&entries()));
    }

    #[test]
    fn test_matches_detects_changes() {
        let manifest = Manifest::new(entries());

        let mut touched = entries();
        touched.get_mut("2023/.photomap_cache.sqlite").unwrap().mtime_ns = 99;
        assert!(!manifest.matches(&touched));

        let mut removed = entries();
        removed.remove("2024/.photomap_cache.sqlite");
        assert!(!manifest.matches(&removed));

        let mut added = entries();
        added.insert("2025/.photomap_cache.sqlite".into(), CacheFingerprint { size: 1, mtime_ns: 1 });
        assert!(!manifest.matches(&added));
    }

    #[test]
    fn test_load_rejects_other_version_and_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(MANIFEST_FILE_NAME);
        assert!(Manifest::load(&path).is_none());

        let mut manifest = Manifest::new(entries());
        manifest.version = 7;
        manifest.save(&path).unwrap();
        assert!(Manifest::load(&path).is_none());

        std::fs::write(&path, b"[]").unwrap();
        assert!(Manifest::load(&path).is_none());
    }
}
