pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};

use crate::atomic;
use crate::domain::PhotoRecord;
use crate::error::{Error, Result};
use schema::RecordColumns;

/// Per-folder cache file name. Hidden so it never shows up as a candidate photo.
pub const CACHE_FILE_NAME: &str = ".photomap_cache.sqlite";

pub fn cache_path(folder: &Path) -> PathBuf {
    folder.join(CACHE_FILE_NAME)
}

/// Load the cached records of `folder`, ordered by file name.
///
/// Never fails: an absent, unreadable, corrupt or differently-versioned cache
/// yields an empty list so the folder is simply analyzed again.
pub fn load(folder: &Path) -> Vec<PhotoRecord> {
    let path = cache_path(folder);
    if !path.exists() {
        return Vec::new();
    }
    match read_cache(&path, folder) {
        Ok(records) => records,
        Err(err) => {
            tracing::warn!(
                cache = %path.display(),
                error = %err,
                "ignoring unusable folder cache"
            );
            Vec::new()
        }
    }
}

/// Read a cache file strictly, surfacing every problem as an error.
pub fn read_cache(path: &Path, folder: &Path) -> Result<Vec<PhotoRecord>> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    schema::check_version(&conn)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT file_name, {} FROM photos ORDER BY file_name",
        schema::RECORD_COLUMNS
    ))?;
    let records = stmt
        .query_map([], |row| {
            let file_name: String = row.get(0)?;
            let columns = RecordColumns::read(row, 1)?;
            Ok(columns.into_record(folder.join(file_name), folder.to_path_buf()))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Combine `new_records` with what is already cached for `folder` and rewrite
/// the cache atomically. New records win for any path present in both.
/// Returns the number of rows written.
pub fn merge(folder: &Path, new_records: &[PhotoRecord]) -> Result<usize> {
    check_ownership(folder, new_records)?;

    let existing = load(folder);
    let mut by_name: BTreeMap<String, &PhotoRecord> = existing
        .iter()
        .map(|r| (r.file_name(), r))
        .collect();
    for record in new_records {
        by_name.insert(record.file_name(), record);
    }

    let rows: Vec<&PhotoRecord> = by_name.into_values().collect();
    write_cache(folder, &rows)?;
    Ok(rows.len())
}

/// Rewrite the cache of `folder` with exactly `records`, discarding prior contents.
pub fn replace(folder: &Path, records: &[PhotoRecord]) -> Result<usize> {
    check_ownership(folder, records)?;

    let mut by_name: BTreeMap<String, &PhotoRecord> = BTreeMap::new();
    for record in records {
        by_name.insert(record.file_name(), record);
    }

    let rows: Vec<&PhotoRecord> = by_name.into_values().collect();
    write_cache(folder, &rows)?;
    Ok(rows.len())
}

fn check_ownership(folder: &Path, records: &[PhotoRecord]) -> Result<()> {
    for record in records {
        if record.path.parent() != Some(folder) {
            return Err(Error::ForeignRecord {
                path: record.path.clone(),
                folder: folder.to_path_buf(),
            });
        }
    }
    Ok(())
}

/// Write sorted rows into a fresh database next to the cache, then rename it over the cache.
fn write_cache(folder: &Path, rows: &[&PhotoRecord]) -> Result<()> {
    let target = cache_path(folder);
    atomic::replace_with(&target, |tmp| {
        let mut conn = Connection::open(tmp)?;
        conn.pragma_update(None, "journal_mode", "DELETE")?;
        schema::initialize(&conn)?;

        let tx = conn.transaction()?;
        schema::stamp_version(&tx)?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO photos (file_name, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                schema::RECORD_COLUMNS
            ))?;
            for record in rows {
                stmt.execute(params![
                    record.file_name(),
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
    })?;

    tracing::debug!(cache = %target.display(), rows = rows.len(), "folder cache written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinate, Fingerprint, Geocode};
    use std::fs;

    fn make_record(folder: &Path, name: &str, sha: &str) -> PhotoRecord {
        PhotoRecord {
            path: folder.join(name),
            coordinate: Some(Coordinate::new(45.764, 4.8357)),
            captured_at: chrono::NaiveDate::from_ymd_opt(2023, 7, 14)
                .unwrap()
                .and_hms_opt(10, 30, 0),
            geocode: Geocode::Pending,
            source_folder: folder.to_path_buf(),
            fingerprint: Fingerprint {
                size: 1024,
                mtime_ns: 1_700_000_000_000_000_000,
                sha256: sha.to_string(),
            },
        }
    }

    // ── load ────────────────────────────────────────────────────

    #[test]
    fn test_load_absent_cache_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load(tmp.path()).is_empty());
    }

    #[test]
    fn test_load_corrupt_cache_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(cache_path(tmp.path()), b"this is not sqlite at all").unwrap();
        assert!(load(tmp.path()).is_empty());
    }

    #[test]
    fn test_load_wrong_schema_version_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path();
        replace(folder, &[make_record(folder, "a.jpg", "aaa")]).unwrap();

        let conn = Connection::open(cache_path(folder)).unwrap();
        conn.execute(
            "UPDATE metadata SET value = '42' WHERE key = 'schema_version'",
            [],
        )
        .unwrap();
        drop(conn);

        assert!(load(folder).is_empty());
    }

    #[test]
    fn test_load_cache_without_version_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let conn = Connection::open(cache_path(tmp.path())).unwrap();
        schema::initialize(&conn).unwrap();
        drop(conn);

        assert!(load(tmp.path()).is_empty());
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path();

        let mut resolved = make_record(folder, "b.jpg", "bbb");
        resolved.geocode = Geocode::Resolved("Lyon, France".into());
        let mut unresolved = make_record(folder, "c.jpg", "ccc");
        unresolved.geocode = Geocode::Unresolved;
        let mut no_location = make_record(folder, "a.jpg", "aaa");
        no_location.coordinate = None;
        no_location.captured_at = None;

        let written = replace(
            folder,
            &[resolved.clone(), unresolved.clone(), no_location.clone()],
        )
        .unwrap();
        assert_eq!(written, 3);

        let loaded = load(folder);
        assert_eq!(loaded, vec![no_location, resolved, unresolved]);
    }

    // ── merge ───────────────────────────────────────────────────

    #[test]
    fn test_merge_new_records_take_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path();
        replace(
            folder,
            &[make_record(folder, "a.jpg", "old"), make_record(folder, "b.jpg", "bbb")],
        )
        .unwrap();

        let mut updated = make_record(folder, "a.jpg", "new");
        updated.geocode = Geocode::Resolved("Paris, France".into());
        let written = merge(folder, &[updated.clone(), make_record(folder, "c.jpg", "ccc")]).unwrap();
        assert_eq!(written, 3);

        let loaded = load(folder);
        let names: Vec<String> = loaded.iter().map(|r| r.file_name()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(loaded[0], updated);
        assert_eq!(loaded[1].fingerprint.sha256, "bbb");
    }

    #[test]
    fn test_merge_into_corrupt_cache_starts_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path();
        fs::write(cache_path(folder), b"garbage").unwrap();

        merge(folder, &[make_record(folder, "a.jpg", "aaa")]).unwrap();
        assert_eq!(load(folder).len(), 1);
    }

    #[test]
    fn test_merge_rejects_foreign_record() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path().join("a");
        let other = tmp.path().join("b");
        fs::create_dir_all(&folder).unwrap();

        let err = merge(&folder, &[make_record(&other, "x.jpg", "xxx")]).unwrap_err();
        assert!(matches!(err, Error::ForeignRecord { .. }));
        assert!(!cache_path(&folder).exists());
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path();
        merge(folder, &[make_record(folder, "a.jpg", "aaa")]).unwrap();
        merge(folder, &[make_record(folder, "b.jpg", "bbb")]).unwrap();

        let names: Vec<String> = fs::read_dir(folder)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![CACHE_FILE_NAME.to_string()]);
    }

    #[test]
    fn test_replace_discards_previous_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = tmp.path();
        replace(
            folder,
            &[make_record(folder, "a.jpg", "aaa"), make_record(folder, "b.jpg", "bbb")],
        )
        .unwrap();
        replace(folder, &[make_record(folder, "b.jpg", "bbb")]).unwrap();

        let loaded = load(folder);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].file_name(), "b.jpg");
    }
}
