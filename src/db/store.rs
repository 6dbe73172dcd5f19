//! SQLite buffer for records awaiting cloud sync.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database lock poisoned")]
    Poisoned,
}

/// Thread-safe local store.
///
/// Inserts commit before returning, and the connection runs with
/// `synchronous=FULL`, so an acknowledged insert survives a crash.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open a store that lives only in memory.
    pub fn in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Open the store at `path`, falling back to memory when the file
    /// cannot be opened. Records buffered in the fallback do not survive a
    /// restart.
    pub fn open_or_degraded<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        match Self::new(path.as_ref()) {
            Ok(store) => Ok(store),
            Err(e) => {
                tracing::error!(
                    "LocalStore: cannot open {} ({}), running degraded with an in-memory buffer",
                    path.as_ref().display(),
                    e
                );
                Self::in_memory()
            }
        }
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Inserts ---

    /// Append a telemetry sample with `synced = 0`, returning its id.
    pub fn insert_telemetry(&self, sample: &TelemetrySample) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO env_data (timestamp, temperature, humidity, pressure, synced) VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                format_db_time(&sample.timestamp),
                sample.temperature,
                sample.humidity,
                sample.pressure,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Append a security summary with `synced = 0`, returning its id.
    pub fn insert_security_summary(&self, summary: &SecuritySummary) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO security_data (timestamp, motion_count, smoke_count, sound_count, synced) VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                format_db_time(&summary.timestamp),
                summary.motion_count,
                summary.smoke_count,
                summary.sound_count,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // --- Readback ---

    /// All unsynced telemetry rows in insertion order.
    pub fn fetch_unsynced_telemetry(&self) -> Result<Vec<SyncRecord<TelemetrySample>>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, temperature, humidity, pressure, synced FROM env_data WHERE synced = 0 ORDER BY id ASC",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(SyncRecord {
                    id: row.get(0)?,
                    synced: row.get::<_, i64>(5)? != 0,
                    record: TelemetrySample {
                        timestamp: time_column(row, 1)?,
                        temperature: row.get(2)?,
                        humidity: row.get(3)?,
                        pressure: row.get(4)?,
                    },
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    /// All unsynced security summaries in insertion order.
    pub fn fetch_unsynced_summaries(&self) -> Result<Vec<SyncRecord<SecuritySummary>>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, motion_count, smoke_count, sound_count, synced FROM security_data WHERE synced = 0 ORDER BY id ASC",
        )?;

        let records = stmt
            .query_map([], |row| {
                Ok(SyncRecord {
                    id: row.get(0)?,
                    synced: row.get::<_, i64>(5)? != 0,
                    record: SecuritySummary {
                        timestamp: time_column(row, 1)?,
                        motion_count: row.get(2)?,
                        smoke_count: row.get(3)?,
                        sound_count: row.get(4)?,
                    },
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(records)
    }

    /// Number of rows of `kind` still waiting for sync.
    pub fn unsynced_count(&self, kind: RecordKind) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE synced = 0", kind.table());
        Ok(conn.query_row(&sql, [], |r| r.get(0))?)
    }

    // --- Sync tracking ---

    /// Flag the given rows as synced. Idempotent; returns how many rows
    /// changed from unsynced to synced.
    pub fn mark_synced(&self, kind: RecordKind, ids: &[i64]) -> Result<usize, DbError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut changed = 0;

        {
            let sql = format!(
                "UPDATE {} SET synced = 1 WHERE id = ?1 AND synced = 0",
                kind.table()
            );
            let mut stmt = tx.prepare(&sql)?;
            for id in ids {
                changed += stmt.execute(params![id])?;
            }
        }

        tx.commit()?;
        Ok(changed)
    }

    /// Whether the row with `id` is flagged as synced.
    #[cfg(test)]
    pub fn is_synced(&self, kind: RecordKind, id: i64) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let sql = format!("SELECT synced FROM {} WHERE id = ?1", kind.table());
        let synced: i64 = conn.query_row(&sql, params![id], |r| r.get(0))?;
        Ok(synced != 0)
    }
}

fn format_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Read a timestamp column. Unparseable text is a conversion error rather
/// than a made-up time.
fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_db_time(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognized timestamp {:?}", text).into(),
        )
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Rows written by older builds used naive ISO timestamps.
    let formats = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}
