//! Notification storage in `DuckDB`.
//!
//! The `maya_notifications` table mirrors the record contract, with the
//! attachment lists stored as JSON text. `document_url` is the primary
//! key; rows are never updated once written.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::NaiveDate;
use duckdb::{AccessMode, Config, Connection};
use maya_notification_models::NotificationRecord;
use maya_scraper::watermark::WatermarkStore;

use crate::DbError;

/// Number of rows per INSERT statement.
const CHUNK_SIZE: usize = 1_000;

/// Opens (or creates) the notification database and ensures the schema
/// exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    crate::paths::ensure_parent_dir(path)?;

    let conn = Connection::open(path)?;
    create_schema(&conn)?;

    Ok(conn)
}

/// Creates the notification and metadata tables if they are missing.
///
/// # Errors
///
/// Returns [`DbError`] if the DDL fails.
pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS maya_notifications (
            date TIMESTAMP NOT NULL,
            source TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            document_url TEXT NOT NULL PRIMARY KEY,
            pdf_files TEXT NOT NULL,
            other_files TEXT NOT NULL,
            file_count BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS _meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Inserts a batch of records, skipping any whose `document_url` is
/// already stored.
///
/// Returns the number of rows actually inserted.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or any database operation fails.
pub fn insert_notifications(
    conn: &Connection,
    records: &[NotificationRecord],
) -> Result<u64, DbError> {
    if records.is_empty() {
        return Ok(0);
    }

    // Keep the first occurrence of each document_url, matching DO NOTHING.
    let mut seen = BTreeSet::new();
    let deduped: Vec<&NotificationRecord> = records
        .iter()
        .filter(|r| seen.insert(r.document_url.as_str()))
        .collect();

    if deduped.len() < records.len() {
        log::info!(
            "Deduplicated INSERT batch: {} -> {} rows ({} duplicates removed)",
            records.len(),
            deduped.len(),
            records.len() - deduped.len(),
        );
    }

    let mut total_inserted = 0u64;

    for chunk in deduped.chunks(CHUNK_SIZE) {
        let mut sql = String::from(
            "INSERT INTO maya_notifications (
                date, source, storage_path, document_url,
                pdf_files, other_files, file_count
            ) VALUES ",
        );

        for (i, _) in chunk.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str("(?, ?, ?, ?, ?, ?, ?)");
        }

        sql.push_str(" ON CONFLICT (document_url) DO NOTHING");

        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1usize;

        for record in chunk {
            let date = record.date.format("%Y-%m-%d %H:%M:%S%.f").to_string();
            let pdf_files = serde_json::to_string(&record.pdf_files)?;
            let other_files = serde_json::to_string(&record.other_files)?;
            let file_count = i64::try_from(record.file_count).map_err(|_| DbError::Conversion {
                message: format!("file_count {} out of range", record.file_count),
            })?;

            stmt.raw_bind_parameter(param_idx, date)?;
            stmt.raw_bind_parameter(param_idx + 1, &record.source)?;
            stmt.raw_bind_parameter(param_idx + 2, &record.storage_path)?;
            stmt.raw_bind_parameter(param_idx + 3, &record.document_url)?;
            stmt.raw_bind_parameter(param_idx + 4, pdf_files)?;
            stmt.raw_bind_parameter(param_idx + 5, other_files)?;
            stmt.raw_bind_parameter(param_idx + 6, file_count)?;

            param_idx += 7;
        }

        let rows = stmt.raw_execute()?;
        total_inserted += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total_inserted)
}

/// Returns the number of stored notifications.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_record_count(conn: &Connection) -> Result<u64, DbError> {
    let mut stmt = conn.prepare("SELECT COUNT(*) FROM maya_notifications")?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Returns the date of the earliest stored notification for `source`, or
/// `None` if there are none.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails (including when the table does
/// not exist yet) or the stored value cannot be parsed.
pub fn get_earliest_date(conn: &Connection, source: &str) -> Result<Option<NaiveDate>, DbError> {
    let mut stmt =
        conn.prepare("SELECT MIN(date)::DATE::TEXT FROM maya_notifications WHERE source = ?")?;
    let result: Option<String> = stmt.query_row([source], |row| row.get(0))?;

    result
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| DbError::Conversion {
                message: format!("invalid stored date {s:?}: {e}"),
            })
        })
        .transpose()
}

/// `_meta` key holding the source label of the last run.
pub const META_SOURCE: &str = "source";
/// `_meta` key holding the stored record count after the last run.
pub const META_RECORD_COUNT: &str = "record_count";
/// `_meta` key holding when the last run ended.
pub const META_LAST_RUN_AT: &str = "last_run_at";
/// `_meta` key holding how the last run ended, see [`RunStatus`].
pub const META_LAST_RUN_STATUS: &str = "last_run_status";
/// `_meta` key holding the error of the last run, present only when it
/// failed.
pub const META_LAST_RUN_ERROR: &str = "last_run_error";
/// `_meta` key holding when a run last covered its whole window.
pub const META_LAST_SYNCED_AT: &str = "last_synced_at";

/// How a scrape run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every period of the window was paged through.
    Completed,
    /// The caller stopped pulling early (record or time limit).
    Stopped,
    /// A fetch or mapping error ended the run.
    Failed,
}

impl RunStatus {
    /// The value stored under [`META_LAST_RUN_STATUS`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync bookkeeping read back from `_meta`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    /// Rows in `maya_notifications`.
    pub record_count: u64,
    /// When a run last covered its whole window.
    pub last_synced_at: Option<String>,
    /// When the last run ended, whatever its status.
    pub last_run_at: Option<String>,
    /// Status of the last run.
    pub last_run_status: Option<String>,
    /// Error that ended the last run, if it failed.
    pub last_run_error: Option<String>,
}

/// Gets a metadata value from the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let mut stmt = conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
    match stmt.query_row([key], |row| row.get(0)) {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Sets a metadata value in the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES (?, ?)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        duckdb::params![key, value],
    )?;
    Ok(())
}

fn clear_meta(conn: &Connection, key: &str) -> Result<(), DbError> {
    conn.execute("DELETE FROM _meta WHERE key = ?", [key])?;
    Ok(())
}

/// Records the end of a scrape run for `source`.
///
/// The run time, status and record count are written for every run.
/// [`META_LAST_SYNCED_AT`] only moves on [`RunStatus::Completed`], so a
/// failed or truncated run never looks like a finished sync. `error` is
/// kept only for [`RunStatus::Failed`] and cleared otherwise.
///
/// # Errors
///
/// Returns [`DbError`] if the metadata update fails.
pub fn record_run(
    conn: &Connection,
    source: &str,
    status: RunStatus,
    error: Option<&str>,
) -> Result<(), DbError> {
    let count = get_record_count(conn)?;
    let now = chrono::Utc::now().to_rfc3339();

    set_meta(conn, META_SOURCE, source)?;
    set_meta(conn, META_RECORD_COUNT, &count.to_string())?;
    set_meta(conn, META_LAST_RUN_AT, &now)?;
    set_meta(conn, META_LAST_RUN_STATUS, status.as_str())?;

    match (status, error) {
        (RunStatus::Failed, Some(message)) => set_meta(conn, META_LAST_RUN_ERROR, message)?,
        _ => clear_meta(conn, META_LAST_RUN_ERROR)?,
    }
    if status == RunStatus::Completed {
        set_meta(conn, META_LAST_SYNCED_AT, &now)?;
    }

    log::debug!("{source}: run {status}, {count} records stored");
    Ok(())
}

/// Reads the sync bookkeeping written by [`record_run`].
///
/// # Errors
///
/// Returns [`DbError`] if a query fails.
pub fn sync_state(conn: &Connection) -> Result<SyncState, DbError> {
    Ok(SyncState {
        record_count: get_record_count(conn)?,
        last_synced_at: get_meta(conn, META_LAST_SYNCED_AT)?,
        last_run_at: get_meta(conn, META_LAST_RUN_AT)?,
        last_run_status: get_meta(conn, META_LAST_RUN_STATUS)?,
        last_run_error: get_meta(conn, META_LAST_RUN_ERROR)?,
    })
}

/// Read-only handle used to resolve the scrape watermark.
pub struct NotificationStore {
    conn: Connection,
}

impl NotificationStore {
    /// Opens an existing database read-only.
    ///
    /// Unlike [`open`], this never creates the file or the schema, so a
    /// first run sees an error here and falls back to the default window.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file does not exist or cannot be opened.
    pub fn connect(path: &Path) -> Result<Self, DbError> {
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        let conn = Connection::open_with_flags(path, config)?;
        Ok(Self { conn })
    }

    /// Wraps an already open connection.
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl WatermarkStore for NotificationStore {
    type Error = DbError;

    fn earliest_record_date(&self, source: &str) -> Result<Option<NaiveDate>, DbError> {
        get_earliest_date(&self.conn, source)
    }
}
