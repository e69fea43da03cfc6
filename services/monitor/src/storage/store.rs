//! Durable patient store.
//!
//! # Schema
//! - `patients`: demographics keyed by MRN; admits overwrite (last writer wins).
//! - `blood_tests`: append-only creatinine results; insertion order = rowid.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, wal_autocheckpoint=1000,
//! foreign_keys=ON. `PRAGMA integrity_check` runs at open; returns an error
//! if it fails.
//!
//! # Concurrency
//! A single writer (the pipeline) owns a read-write handle; the inference
//! drainer opens an independent read-only handle on the same file.
//!
//! Timestamps are stored in the 14-digit `YYYYMMDDHHMMSS` form, which is
//! lexicographically ordered, so the snapshot time bound is a string compare.

use hl7_core::{Hl7Timestamp, Sex};
use rusqlite::{Connection, OpenFlags, params};
use std::path::Path;
use tracing::info;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A patient's demographics plus their creatinine history in insertion order.
///
/// `dates` and `creatinine_levels` are parallel.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientView {
    pub dob: Hl7Timestamp,
    pub sex: Sex,
    pub dates: Vec<Hl7Timestamp>,
    pub creatinine_levels: Vec<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("no demographics for MRN {0}")]
    NotFound(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("reading history: {0}")]
    Io(#[from] std::io::Error),
    #[error("history line {line}: {reason}")]
    BadHistory { line: usize, reason: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// PatientStore
// ---------------------------------------------------------------------------

/// Handle to the on-disk patient database.
pub struct PatientStore {
    conn: Connection,
}

// `Connection`'s interior mutability (`RefCell`) makes it `!Sync`, but each
// `PatientStore` has exactly one owner (the pipeline's writer handle, or the
// drainer's independent read-only handle) that is never aliased across
// threads — only moved between them as the task is polled. That makes a
// shared reference held across an `.await` point sound even though the
// compiler can't prove it on its own.
unsafe impl Sync for PatientStore {}

impl PatientStore {
    /// Open (or create) the store read-write.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates tables if
    /// needed.
    pub fn open(path: &Path) -> Result<PatientStore, StoreError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(PatientStore { conn })
    }

    /// Open an independent read-only handle (for the inference drainer).
    pub fn open_read_only(path: &Path) -> Result<PatientStore, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(PatientStore { conn })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Record demographics from an admit. Last writer wins.
    pub fn upsert_demographics(
        &mut self,
        mrn: &str,
        dob: &Hl7Timestamp,
        sex: Sex,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO patients (mrn, dob, sex) VALUES (?1, ?2, ?3)
             ON CONFLICT(mrn) DO UPDATE SET dob = excluded.dob, sex = excluded.sex",
            params![mrn, dob.compact(), sex.as_flag()],
        )?;
        Ok(())
    }

    /// Append one creatinine result. No dedup: identical (mrn, timestamp)
    /// pairs are retained.
    pub fn append_lab(
        &mut self,
        mrn: &str,
        timestamp: &Hl7Timestamp,
        value: f64,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO blood_tests (mrn, timestamp, creatinine_level) VALUES (?1, ?2, ?3)",
            params![mrn, timestamp.compact(), value],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // History bootstrap
    // -----------------------------------------------------------------------

    /// True once any demographics or labs exist.
    pub fn is_populated(&self) -> Result<bool, StoreError> {
        let labs: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM blood_tests", [], |row| row.get(0))?;
        let patients: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;
        Ok(labs > 0 || patients > 0)
    }

    /// Load the historical labs CSV on first launch.
    ///
    /// Wide format: `mrn` followed by alternating `creatinine_date_i`,
    /// `creatinine_result_i` columns; a blank cell ends that row's history.
    /// A no-op when the store is already populated, so restarts do not
    /// re-ingest. Returns the number of observations loaded.
    pub fn bootstrap_from_csv(&mut self, path: &Path) -> Result<usize, StoreError> {
        if self.is_populated()? {
            info!("store already populated, skipping history bootstrap");
            return Ok(0);
        }

        let contents = std::fs::read_to_string(path)?;
        let tx = self.conn.transaction()?;
        let mut loaded = 0usize;

        // First line is the column header.
        for (index, line) in contents.lines().enumerate().skip(1) {
            let line_no = index + 1;
            let bad = |reason: String| StoreError::BadHistory {
                line: line_no,
                reason,
            };

            if line.trim().is_empty() {
                continue;
            }
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            let mrn = cells[0];
            if mrn.is_empty() {
                return Err(bad("empty mrn".to_owned()));
            }

            for pair in cells[1..].chunks(2) {
                let date = pair[0];
                if date.is_empty() {
                    break;
                }
                let result = pair.get(1).copied().unwrap_or("");
                if result.is_empty() {
                    return Err(bad(format!("date {date:?} without a result")));
                }
                let timestamp = parse_history_date(date)
                    .map_err(|e| bad(format!("bad date {date:?}: {e}")))?;
                let value = result
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v > 0.0)
                    .ok_or_else(|| bad(format!("bad result {result:?}")))?;
                tx.execute(
                    "INSERT INTO blood_tests (mrn, timestamp, creatinine_level)
                     VALUES (?1, ?2, ?3)",
                    params![mrn, timestamp.compact(), value],
                )?;
                loaded += 1;
            }
        }

        tx.commit()?;
        info!(observations = loaded, "history bootstrap complete");
        Ok(loaded)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The store's view of one patient, optionally bounded to labs with
    /// `timestamp <= up_to`.
    ///
    /// Fails with `NotFound` when no demographics exist for `mrn` — labs
    /// alone are not scoreable.
    pub fn snapshot(
        &self,
        mrn: &str,
        up_to: Option<&Hl7Timestamp>,
    ) -> Result<PatientView, StoreError> {
        let (dob_raw, sex_flag): (String, i64) = self
            .conn
            .query_row(
                "SELECT dob, sex FROM patients WHERE mrn = ?1",
                params![mrn],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(mrn.to_owned()),
                other => StoreError::Sqlite(other),
            })?;

        let dob = parse_stored_timestamp(&dob_raw)?;
        let sex = Sex::from_flag(sex_flag)
            .ok_or_else(|| StoreError::Corrupt(format!("sex flag {sex_flag} for MRN {mrn}")))?;

        let bound = up_to.map(Hl7Timestamp::compact);
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, creatinine_level FROM blood_tests
             WHERE mrn = ?1 AND (?2 IS NULL OR timestamp <= ?2)
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![mrn, bound], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut dates = Vec::new();
        let mut creatinine_levels = Vec::new();
        for row in rows {
            let (raw, value) = row?;
            dates.push(parse_stored_timestamp(&raw)?);
            creatinine_levels.push(value);
        }

        Ok(PatientView {
            dob,
            sex,
            dates,
            creatinine_levels,
        })
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA wal_autocheckpoint=1000;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

/// History exports carry ISO dates; anything already compact also decodes.
fn parse_history_date(raw: &str) -> Result<Hl7Timestamp, hl7_core::TimestampError> {
    if raw.contains('-') {
        Hl7Timestamp::parse_iso(raw)
    } else {
        Hl7Timestamp::parse(raw)?.ok_or(hl7_core::TimestampError::InvalidLength(0))
    }
}

fn parse_stored_timestamp(raw: &str) -> Result<Hl7Timestamp, StoreError> {
    Hl7Timestamp::parse(raw)
        .ok()
        .flatten()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {raw:?}")))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
