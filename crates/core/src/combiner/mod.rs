pub mod manifest;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use rusqlite::{params, Connection, OpenFlags};
use walkdir::WalkDir;

use crate::atomic;
use crate::domain::PhotoRecord;
use crate::error::{Error, Result};
use crate::folder_cache::{self, schema};
use crate::scanner::{self, META_DIR_NAME};
use manifest::{CacheFingerprint, Manifest, MANIFEST_FILE_NAME};

pub const COMBINED_FILE_NAME: &str = "combined.sqlite";

/// The `.photomap` directory holding root-level state.
pub fn meta_dir(root: &Path) -> PathBuf {
    root.join(META_DIR_NAME)
}

pub fn combined_path(root: &Path) -> PathBuf {
    meta_dir(root).join(COMBINED_FILE_NAME)
}

pub fn manifest_path(root: &Path) -> PathBuf {
    meta_dir(root).join(MANIFEST_FILE_NAME)
}

/// Every record under a root, with `source_folder` relative to the root.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedDataset {
    pub records: Vec<PhotoRecord>,
    /// Whether the folder caches were re-read to produce this dataset.
    pub rebuilt: bool,
}

impl CombinedDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Every folder cache file under `root`, sorted. Hidden directories, `.photomap`
/// included, are not entered.
pub fn discover_folder_caches(root: &Path) -> Result<Vec<PathBuf>> {
    let mut caches = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !scanner::is_hidden_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && entry.file_name() == folder_cache::CACHE_FILE_NAME {
            caches.push(entry.into_path());
        }
    }

    caches.sort();
    Ok(caches)
}

/// Current fingerprint of each folder cache, keyed like the manifest.
/// Caches that vanish while being inspected are left out.
fn current_fingerprints(root: &Path, caches: &[PathBuf]) -> BTreeMap<String, CacheFingerprint> {
    caches
        .iter()
        .filter_map(|path| {
            let fp = CacheFingerprint::of(path).ok()?;
            Some((relative_key(root, path), fp))
        })
        .collect()
}

/// `/`-separated path of `path` relative to `root`; `.` for the root itself.
fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Whether the combined store no longer reflects the folder caches under `root`.
pub fn is_stale(root: &Path) -> Result<bool> {
    if !combined_path(root).is_file() {
        return Ok(true);
    }
    let manifest = match Manifest::load(&manifest_path(root)) {
        Some(m) => m,
        None => return Ok(true),
    };
    let caches = discover_folder_caches(root)?;
    Ok(!manifest.matches(&current_fingerprints(root, &caches)))
}

/// Re-read every folder cache and rewrite the combined store and manifest.
pub fn rebuild(root: &Path) -> Result<CombinedDataset> {
    let caches = discover_folder_caches(root)?;

    let loaded: Vec<(String, Option<CacheFingerprint>, Vec<PhotoRecord>)> = caches
        .par_iter()
        .map(|path| {
            // Fingerprint first so a write racing with the read shows up as stale next time.
            let fp = CacheFingerprint::of(path).ok();
            let folder = path.parent().unwrap_or(root);
            let source_folder = PathBuf::from(relative_key(root, folder));
            let records = folder_cache::load(folder)
                .into_iter()
                .map(|r| PhotoRecord {
                    source_folder: source_folder.clone(),
                    ..r
                })
                .collect();
            (relative_key(root, path), fp, records)
        })
        .collect();

    let mut entries = BTreeMap::new();
    let mut records = Vec::new();
    for (key, fp, folder_records) in loaded {
        if let Some(fp) = fp {
            entries.insert(key, fp);
        }
        records.extend(folder_records);
    }
    records.sort_by_cached_key(|r| sort_key(root, r));

    std::fs::create_dir_all(meta_dir(root))?;
    write_store(root, &records)?;
    Manifest::new(entries).save(&manifest_path(root))?;

    tracing::info!(
        root = %root.display(),
        folder_caches = caches.len(),
        records = records.len(),
        "combined dataset rebuilt"
    );
    Ok(CombinedDataset {
        records,
        rebuilt: true,
    })
}

/// The combined dataset, read from the store when fresh and rebuilt otherwise.
pub fn load(root: &Path) -> Result<CombinedDataset> {
    if !is_stale(root)? {
        match read_store(root) {
            Ok(records) => {
                tracing::debug!(root = %root.display(), records = records.len(), "combined dataset is fresh");
                return Ok(CombinedDataset {
                    records,
                    rebuilt: false,
                });
            }
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "combined store unreadable, rebuilding");
            }
        }
    }
    rebuild(root)
}

/// Delete the combined store and manifest. Folder caches and the geocode cache are kept.
/// Returns how many files were removed.
pub fn force_clear(root: &Path) -> Result<usize> {
    let mut removed = 0;
    for path in [combined_path(root), manifest_path(root)] {
        if atomic::remove_if_exists(&path)? {
            removed += 1;
        }
    }
    tracing::info!(root = %root.display(), removed, "combined dataset cleared");
    Ok(removed)
}

fn sort_key(root: &Path, record: &PhotoRecord) -> (String, String) {
    (
        record.source_folder.to_string_lossy().into_owned(),
        relative_key(root, &record.path),
    )
}

fn write_store(root: &Path, records: &[PhotoRecord]) -> Result<()> {
    atomic::replace_with(&combined_path(root), |tmp| {
        let mut conn = Connection::open(tmp)?;
        conn.pragma_update(None, "journal_mode", "DELETE")?;
        conn.execute_batch(
            "
            CREATE TABLE metadata (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE photos (
                source_folder TEXT NOT NULL,
                path          TEXT NOT NULL,
                size          INTEGER NOT NULL,
                mtime_ns      INTEGER NOT NULL,
                sha256        TEXT NOT NULL,
                latitude      REAL,
                longitude     REAL,
                captured_at   TEXT,
                place_name    TEXT,
                geocode_state TEXT NOT NULL,
                PRIMARY KEY (source_folder, path)
            );
            ",
        )?;

        let tx = conn.transaction()?;
        schema::stamp_version(&tx)?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO photos (source_folder, path, {}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                schema::RECORD_COLUMNS
            ))?;
            for record in records {
                let (source_folder, path) = sort_key(root, record);
                stmt.execute(params![
                    source_folder,
                    path,
                    record.fingerprint.size as i64,
                    record.fingerprint.mtime_ns,
                    record.fingerprint.sha256,
                    record.coordinate.map(|c| c.latitude),
                    record.coordinate.map(|c| c.longitude),
                    schema::capture_text(record),
                    record.place_name(),
                    record.geocode.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        conn.close().map_err(|(_, e)| Error::Database(e))?;
        Ok(())
    })
}

fn read_store(root: &Path) -> Result<Vec<PhotoRecord>> {
    let conn = Connection::open_with_flags(
        combined_path(root),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    schema::check_version(&conn)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT source_folder, path, {} FROM photos ORDER BY source_folder, path",
        schema::RECORD_COLUMNS
    ))?;
    let records = stmt
        .query_map([], |row| {
            let source_folder: String = row.get(0)?;
            let path: String = row.get(1)?;
            let columns = schema::RecordColumns::read(row, 2)?;
            Ok(columns.into_record(root.join(path), PathBuf::from(source_folder)))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Combined-dataset access for one root, serialized with folder persisting through a shared lock.
#[derive(Debug, Clone)]
pub struct Combiner {
    root: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl Combiner {
    pub fn new(root: PathBuf, lock: Arc<Mutex<()>>) -> Self {
        Self { root, lock }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_stale(&self) -> Result<bool> {
        is_stale(&self.root)
    }

    pub fn load(&self) -> Result<CombinedDataset> {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        load(&self.root)
    }

    pub fn rebuild(&self) -> Result<CombinedDataset> {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        rebuild(&self.root)
    }

    pub fn force_clear(&self) -> Result<usize> {
        let _lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        force_clear(&self.root)
    }

    pub fn folder_caches(&self) -> Result<Vec<PathBuf>> {
        discover_folder_caches(&self.root)
    }
}
