#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Data model for the Maya disclosure-notification scraper.
//!
//! The scraper turns paginated [`RawReportEntry`] values from the Maya
//! filter API into [`NotificationRecord`]s. Dates are bounded by a
//! [`ScrapeWindow`] which is split into [`Period`]s before fetching.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Source label stamped on every record.
pub const SOURCE: &str = "maya.tase.co.il";

/// Report filter endpoint of the Maya API.
pub const API_URL: &str = "https://mayaapi.tase.co.il/api/report/filter";

/// Host serving the HTML and PDF documents.
pub const FILE_HOST: &str = "https://mayafiles.tase.co.il";

/// `Type` tag of PDF attachments.
pub const PDF_FILE_TYPE: i64 = 2;

/// Date range of a single scrape run.
///
/// `from <= to` always holds for values built through [`ScrapeWindow::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScrapeWindow {
    /// Inclusive lower bound.
    pub from: NaiveDate,
    /// Upper bound, normally today.
    pub to: NaiveDate,
}

impl ScrapeWindow {
    /// Creates a window, returning `None` if `from` is after `to`.
    #[must_use]
    pub fn new(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }
}

impl fmt::Display for ScrapeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.from, self.to)
    }
}

/// A bounded sub-range of a [`ScrapeWindow`], queried as one pagination
/// unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    /// First day of the period.
    pub start: NaiveDate,
    /// Last day of the period.
    pub end: NaiveDate,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// One report as returned in the `Reports` array of the filter API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawReportEntry {
    /// Publication timestamp, e.g. `2018-05-21T23:27:32.687`.
    #[serde(rename = "PubDate")]
    pub pub_date: String,
    /// Numeric document ID.
    #[serde(rename = "RptCode")]
    pub rpt_code: u64,
    /// Attached files.
    #[serde(rename = "Files")]
    pub files: Vec<ReportFile>,
}

/// A file attached to a report.
///
/// Fields other than `Name` and `Type` are kept in `extra` so the file
/// serializes back to the shape it arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportFile {
    /// Display name. May be empty or missing.
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    /// Attachment kind; [`PDF_FILE_TYPE`] marks PDFs.
    #[serde(rename = "Type")]
    pub file_type: i64,
    /// Remaining upstream fields, untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ReportFile {
    /// Returns `true` if this attachment is a PDF.
    #[must_use]
    pub const fn is_pdf(&self) -> bool {
        self.file_type == PDF_FILE_TYPE
    }

    /// Returns `true` if the file has a non-empty name.
    #[must_use]
    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// A PDF attachment with its derived download URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfFile {
    /// Display name from the upstream file entry.
    pub name: Option<String>,
    /// Download URL on [`FILE_HOST`].
    pub url: String,
}

/// A disclosure notification, the unit of output of the scraper.
///
/// Keyed by `document_url`. Field order is part of the output contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Publication timestamp.
    pub date: NaiveDateTime,
    /// Always [`SOURCE`].
    pub source: String,
    /// Object path grouped by publication month, e.g.
    /// `maya.tase.co.il/2018_05/1162540.htm`.
    pub storage_path: String,
    /// URL of the HTML rendition of the report.
    pub document_url: String,
    /// PDF attachments, in upstream order.
    pub pdf_files: Vec<PdfFile>,
    /// Named non-PDF attachments, as received.
    pub other_files: Vec<ReportFile>,
    /// Number of attachments, including unnamed ones.
    pub file_count: u64,
}
