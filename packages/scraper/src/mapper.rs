//! Mapping raw report entries to notification records.
//!
//! The document host partitions files into buckets of [`SEGMENT_SIZE`]
//! consecutive IDs and expects the bucket bounds in every path, so both
//! the HTML and PDF URLs are built from the [`SegmentBucket`] of the
//! report ID.

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use maya_notification_models::{NotificationRecord, PdfFile, RawReportEntry};

use crate::{ScrapeConfig, ScrapeError};

/// Width of a document ID bucket on the file host.
pub const SEGMENT_SIZE: u64 = 1000;

/// The ID bucket a document lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentBucket {
    /// `floor(id / 1000) * 1000`.
    pub start: u64,
    /// `start + 1000`.
    pub end: u64,
}

impl SegmentBucket {
    /// Returns the bucket containing `document_id`.
    #[must_use]
    pub const fn for_document(document_id: u64) -> Self {
        let start = document_id / SEGMENT_SIZE * SEGMENT_SIZE;
        Self {
            start,
            end: start + SEGMENT_SIZE,
        }
    }
}

/// Formats as the path segment used by the file host, `{start+1}-{end}`.
impl fmt::Display for SegmentBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start + 1, self.end)
    }
}

/// URL of the HTML rendition of a report.
#[must_use]
pub fn document_url(file_host: &str, document_id: u64) -> String {
    let bucket = SegmentBucket::for_document(document_id);
    format!("{file_host}/RHtm/{bucket}/H{document_id}.htm")
}

/// URL of the `seq`-th PDF attached to a report.
#[must_use]
pub fn pdf_url(file_host: &str, document_id: u64, seq: usize) -> String {
    let bucket = SegmentBucket::for_document(document_id);
    format!("{file_host}/rpdf/{bucket}/P{document_id}-{seq:02}.pdf")
}

/// Storage object path, grouped by publication month.
#[must_use]
pub fn storage_path(source: &str, date: &NaiveDateTime, document_id: u64) -> String {
    format!("{source}/{}/{document_id}.htm", date.format("%Y_%m"))
}

/// Parses a `PubDate` value.
///
/// Accepts naive ISO 8601 timestamps with or without fractional seconds
/// (`2018-05-21T23:27:32.687`) and falls back to RFC 3339 with an offset,
/// keeping the local wall-clock time.
#[must_use]
pub fn parse_pub_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_local())
}

/// Decodes one raw report value.
///
/// # Errors
///
/// Returns [`ScrapeError::MalformedEntry`] if a required field is missing
/// or has the wrong type.
pub fn decode_entry(value: serde_json::Value) -> Result<RawReportEntry, ScrapeError> {
    serde_json::from_value(value).map_err(|e| ScrapeError::MalformedEntry {
        message: e.to_string(),
    })
}

/// Maps one report entry to its notification record.
///
/// # Errors
///
/// Returns [`ScrapeError::MalformedEntry`] if the publication date cannot
/// be parsed.
pub fn map_entry(
    entry: &RawReportEntry,
    config: &ScrapeConfig,
) -> Result<NotificationRecord, ScrapeError> {
    let id = entry.rpt_code;
    let date = parse_pub_date(&entry.pub_date).ok_or_else(|| ScrapeError::MalformedEntry {
        message: format!("report {id}: unparseable PubDate {:?}", entry.pub_date),
    })?;

    let pdf_files = entry
        .files
        .iter()
        .filter(|f| f.is_pdf())
        .enumerate()
        .map(|(seq, f)| PdfFile {
            name: f.name.clone(),
            url: pdf_url(&config.file_host, id, seq),
        })
        .collect();

    let other_files = entry
        .files
        .iter()
        .filter(|f| !f.is_pdf() && f.has_name())
        .cloned()
        .collect();

    Ok(NotificationRecord {
        date,
        source: config.source.clone(),
        storage_path: storage_path(&config.source, &date, id),
        document_url: document_url(&config.file_host, id),
        pdf_files,
        other_files,
        file_count: entry.files.len() as u64,
    })
}
