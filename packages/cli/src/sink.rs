//! Destinations for scraped records.
//!
//! Records can be streamed as newline-delimited JSON and/or batched into
//! the `DuckDB` store. Store batches are flushed every [`BATCH_SIZE`]
//! records and once more when the run ends, including after a failure,
//! so everything emitted before the failure is kept.

use std::io::Write;

use maya_database::notification_db::{self, RunStatus};
use maya_database::{Connection, DbError};
use maya_notification_models::NotificationRecord;

/// Records buffered before a store flush.
pub const BATCH_SIZE: usize = 500;

/// Totals reported at the end of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    /// Records received from the scraper.
    pub received: u64,
    /// Rows newly inserted into the store.
    pub inserted: u64,
}

/// Fan-out of records to the configured destinations.
pub struct Sinks {
    store: Option<Connection>,
    ndjson: Option<Box<dyn Write>>,
    batch: Vec<NotificationRecord>,
    stats: SinkStats,
}

impl Sinks {
    /// Creates a sink writing to `store` and/or `ndjson`.
    #[must_use]
    pub fn new(store: Option<Connection>, ndjson: Option<Box<dyn Write>>) -> Self {
        Self {
            store,
            ndjson,
            batch: Vec::with_capacity(BATCH_SIZE),
            stats: SinkStats::default(),
        }
    }

    /// Accepts one record.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the JSON line or flushing a full batch
    /// fails.
    pub fn push(&mut self, record: NotificationRecord) -> Result<(), Box<dyn std::error::Error>> {
        self.stats.received += 1;

        if let Some(out) = self.ndjson.as_mut() {
            serde_json::to_writer(&mut *out, &record)?;
            out.write_all(b"\n")?;
        }

        if self.store.is_some() {
            self.batch.push(record);
            if self.batch.len() >= BATCH_SIZE {
                self.flush()?;
            }
        }

        Ok(())
    }

    /// Writes any buffered records to the store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    pub fn flush(&mut self) -> Result<(), DbError> {
        if let Some(conn) = &self.store
            && !self.batch.is_empty()
        {
            let inserted = notification_db::insert_notifications(conn, &self.batch)?;
            log::debug!("Stored batch of {}: {inserted} new", self.batch.len());
            self.stats.inserted += inserted;
            self.batch.clear();
        }
        Ok(())
    }

    /// Flushes everything and records how the run for `source` ended.
    ///
    /// Buffered records are written whatever the `status`; only a
    /// completed run moves the store's last sync time.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush, metadata update, or output
    /// flush fails.
    pub fn finish(
        mut self,
        source: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<SinkStats, Box<dyn std::error::Error>> {
        self.flush()?;

        if let Some(conn) = &self.store {
            notification_db::record_run(conn, source, status, error)?;
        }
        if let Some(out) = self.ndjson.as_mut() {
            out.flush()?;
        }

        Ok(self.stats)
    }
}
