//! SQLite catalog
//!
//! Each call opens its own connection and commits before returning, so a
//! crash mid-scan keeps every record stored so far.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;
use crate::extractor::MediaRecord;
use crate::metadata::{GpsCoordinates, MediaKind};

/// What the scanner needs from persistence
pub trait MediaStore: Send + Sync {
    fn file_exists(&self, path: &str) -> Result<bool>;
    fn upsert(&self, record: &MediaRecord) -> Result<()>;
}

/// Mood value that disables the mood filter
pub const ALL_MOODS: &str = "All";

/// Query filters; unset fields do not constrain
#[derive(Debug, Clone, Default)]
pub struct MediaFilter {
    pub mood: Option<String>,
    pub min_people: Option<u32>,
    pub max_people: Option<u32>,
    pub keyword: Option<String>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS media_records (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    path           TEXT NOT NULL UNIQUE,
    name           TEXT NOT NULL,
    kind           TEXT NOT NULL,
    captured_at    TEXT,
    gps_latitude   REAL,
    gps_longitude  REAL,
    person_count   INTEGER NOT NULL DEFAULT 0,
    ocr_summary    TEXT NOT NULL DEFAULT '',
    keywords       TEXT,
    mood           TEXT NOT NULL DEFAULT 'Neutral',
    thumbnail_path TEXT
);
CREATE INDEX IF NOT EXISTS idx_media_records_mood ON media_records(mood);
";

const COLUMNS: &str = "path, name, kind, captured_at, gps_latitude, gps_longitude, \
                       person_count, ocr_summary, keywords, mood, thumbnail_path";

const CSV_HEADER: [&str; 11] = [
    "path",
    "name",
    "kind",
    "captured_at",
    "gps_latitude",
    "gps_longitude",
    "person_count",
    "ocr_summary",
    "keywords",
    "mood",
    "thumbnail_path",
];

pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Create the database file and schema if missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        let conn = store.connect()?;
        conn.execute_batch(SCHEMA)?;
        info!("📦 Catalog ready at {}", store.path.display());
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Newest rows first
    pub fn get_all(&self) -> Result<Vec<MediaRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM media_records ORDER BY id DESC",
            COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_by_path(&self, path: &str) -> Result<Option<MediaRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM media_records WHERE path = ?1", COLUMNS),
                [path],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_filtered(&self, filter: &MediaFilter) -> Result<Vec<MediaRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(mood) = filter.mood.as_deref().filter(|m| *m != ALL_MOODS) {
            clauses.push("mood = ?");
            values.push(mood.to_string().into());
        }
        if let Some(min) = filter.min_people {
            clauses.push("person_count >= ?");
            values.push(i64::from(min).into());
        }
        if let Some(max) = filter.max_people {
            clauses.push("person_count <= ?");
            values.push(i64::from(max).into());
        }
        if let Some(keyword) = filter.keyword.as_deref().filter(|k| !k.is_empty()) {
            clauses.push("keywords LIKE ?");
            values.push(format!("%{}%", keyword).into());
        }

        let mut sql = format!("SELECT {} FROM media_records", COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id DESC");

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM media_records", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Write `records` (or the whole catalog) as CSV; false when empty
    pub fn export_csv(&self, out: &Path, records: Option<&[MediaRecord]>) -> Result<bool> {
        let owned;
        let records = match records {
            Some(r) => r,
            None => {
                owned = self.get_all()?;
                &owned[..]
            }
        };
        if records.is_empty() {
            return Ok(false);
        }

        let mut writer = csv::Writer::from_path(out)?;
        writer.write_record(CSV_HEADER)?;
        for r in records {
            writer.write_record([
                r.path.clone(),
                r.name.clone(),
                r.kind.to_string(),
                r.captured_at.clone().unwrap_or_default(),
                r.gps.map(|g| g.latitude.to_string()).unwrap_or_default(),
                r.gps.map(|g| g.longitude.to_string()).unwrap_or_default(),
                r.person_count.to_string(),
                r.ocr_summary.clone(),
                r.keywords.clone().unwrap_or_default(),
                r.mood.clone(),
                r.thumbnail_path.clone().unwrap_or_default(),
            ])?;
        }
        writer.flush()?;
        info!("📤 Exported {} records to {}", records.len(), out.display());
        Ok(true)
    }
}

impl MediaStore for SqliteStore {
    fn file_exists(&self, path: &str) -> Result<bool> {
        let conn = self.connect()?;
        let found = conn
            .query_row("SELECT 1 FROM media_records WHERE path = ?1", [path], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Replace every field of the row for `record.path`
    fn upsert(&self, record: &MediaRecord) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO media_records ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(path) DO UPDATE SET
                    name = excluded.name,
                    kind = excluded.kind,
                    captured_at = excluded.captured_at,
                    gps_latitude = excluded.gps_latitude,
                    gps_longitude = excluded.gps_longitude,
                    person_count = excluded.person_count,
                    ocr_summary = excluded.ocr_summary,
                    keywords = excluded.keywords,
                    mood = excluded.mood,
                    thumbnail_path = excluded.thumbnail_path",
                COLUMNS
            ),
            params![
                record.path,
                record.name,
                record.kind.as_str(),
                record.captured_at,
                record.gps.map(|g| g.latitude),
                record.gps.map(|g| g.longitude),
                record.person_count,
                record.ocr_summary,
                record.keywords,
                record.mood,
                record.thumbnail_path,
            ],
        )?;
        tx.commit()?;
        debug!("Stored {}", record.path);
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    let kind: String = row.get(2)?;
    let latitude: Option<f64> = row.get(4)?;
    let longitude: Option<f64> = row.get(5)?;
    Ok(MediaRecord {
        path: row.get(0)?,
        name: row.get(1)?,
        kind: MediaKind::parse(&kind),
        captured_at: row.get(3)?,
        gps: latitude
            .zip(longitude)
            .map(|(latitude, longitude)| GpsCoordinates { latitude, longitude }),
        person_count: row.get(6)?,
        ocr_summary: row.get(7)?,
        keywords: row.get(8)?,
        mood: row.get(9)?,
        thumbnail_path: row.get(10)?,
    })
}
