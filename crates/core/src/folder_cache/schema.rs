use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::domain::{Coordinate, Fingerprint, Geocode, PhotoRecord};
use crate::error::{Error, Result};

/// Bumped whenever a cache table changes shape. Caches stamped with any other
/// version are treated as absent and regenerated.
pub const SCHEMA_VERSION: u32 = 1;

/// Storage format for `captured_at`.
pub const CAPTURE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columns shared by the folder cache and the combined store, in select order.
pub(crate) const RECORD_COLUMNS: &str =
    "size, mtime_ns, sha256, latitude, longitude, captured_at, place_name, geocode_state";

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS photos (
            file_name     TEXT PRIMARY KEY,
            size          INTEGER NOT NULL,
            mtime_ns      INTEGER NOT NULL,
            sha256        TEXT NOT NULL,
            latitude      REAL,
            longitude     REAL,
            captured_at   TEXT,
            place_name    TEXT,
            geocode_state TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

/// Record the current schema version in the `metadata` table.
pub fn stamp_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

pub fn read_version(conn: &Connection) -> Result<Option<u32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

/// Accept only caches written with exactly [`SCHEMA_VERSION`].
pub fn check_version(conn: &Connection) -> Result<()> {
    match read_version(conn)? {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(v) if v > SCHEMA_VERSION => Err(Error::SchemaTooNew {
            db: v,
            code: SCHEMA_VERSION,
        }),
        found => Err(Error::SchemaMismatch {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}

/// The non-key parts of a [`PhotoRecord`] as stored in a row.
pub(crate) struct RecordColumns {
    pub fingerprint: Fingerprint,
    pub coordinate: Option<Coordinate>,
    pub captured_at: Option<NaiveDateTime>,
    pub geocode: Geocode,
}

impl RecordColumns {
    /// Decode [`RECORD_COLUMNS`] starting at column `start`.
    pub fn read(row: &Row<'_>, start: usize) -> rusqlite::Result<Self> {
        let size: i64 = row.get(start)?;
        let captured_at: Option<String> = row.get(start + 5)?;
        let state: String = row.get(start + 7)?;
        Ok(Self {
            fingerprint: Fingerprint {
                size: size.max(0) as u64,
                mtime_ns: row.get(start + 1)?,
                sha256: row.get(start + 2)?,
            },
            coordinate: Coordinate::from_parts(row.get(start + 3)?, row.get(start + 4)?),
            captured_at: captured_at
                .and_then(|s| NaiveDateTime::parse_from_str(&s, CAPTURE_FORMAT).ok()),
            geocode: Geocode::from_columns(&state, row.get(start + 6)?),
        })
    }

    pub fn into_record(
        self,
        path: std::path::PathBuf,
        source_folder: std::path::PathBuf,
    ) -> PhotoRecord {
        PhotoRecord {
            path,
            coordinate: self.coordinate,
            captured_at: self.captured_at,
            geocode: self.geocode,
            source_folder,
            fingerprint: self.fingerprint,
        }
    }
}

/// `captured_at` in its stored text form.
pub(crate) fn capture_text(record: &PhotoRecord) -> Option<String> {
    record
        .captured_at
        .map(|t| t.format(CAPTURE_FORMAT).to_string())
}
