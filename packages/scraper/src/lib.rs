#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incremental scraper for Maya disclosure notifications.
//!
//! A run starts from a [`ScrapeWindow`](maya_notification_models::ScrapeWindow)
//! resolved by [`watermark::resolve_window`], splits it into six-month
//! [`Period`]s (newest first, see [`period`]), pages through each period
//! with a [`ReportFetcher`] until an empty page comes back, and maps every
//! report into a [`NotificationRecord`](maya_notification_models::NotificationRecord).
//!
//! [`scrape`] exposes the whole run as a single lazy stream. Calls are
//! strictly sequential; [`MayaApiFetcher`] sleeps for the configured
//! politeness delay after every call.

pub mod fetch;
pub mod filter;
pub mod mapper;
pub mod orchestrator;
pub mod period;
pub mod watermark;

use std::time::Duration;

use maya_notification_models::{API_URL, FILE_HOST, Period, SOURCE};

pub use fetch::{MayaApiFetcher, ReportFetcher};
pub use orchestrator::scrape;

/// Default pause after every API call.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

/// The underlying cause of a failed page fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchFailure {
    /// The request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not a valid report page.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors that can occur while scraping.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// A page could not be fetched or decoded.
    #[error(
        "Failed to call Maya API for date_from:{} date_to:{} page_num:{page}",
        period.start,
        period.end
    )]
    Fetch {
        /// The period being paged through.
        period: Period,
        /// Zero-based page number.
        page: u32,
        /// What went wrong.
        #[source]
        source: FetchFailure,
    },

    /// A report entry did not match the expected shape.
    #[error("Malformed report entry: {message}")]
    MalformedEntry {
        /// Description of what went wrong.
        message: String,
    },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[source] reqwest::Error),
}

/// Settings for a scrape run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeConfig {
    /// Filter endpoint URL.
    pub api_url: String,
    /// Base URL of the document host used for derived URLs.
    pub file_host: String,
    /// Source label stamped on records and used for the watermark lookup.
    pub source: String,
    /// Pause after every API call.
    pub delay: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrapeConfig {
    /// Creates a `ScrapeConfig` pointing at the public Maya API.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_url: API_URL.to_owned(),
            file_host: FILE_HOST.to_owned(),
            source: SOURCE.to_owned(),
            delay: DEFAULT_DELAY,
        }
    }

    /// Sets the filter endpoint URL.
    #[must_use]
    pub fn with_api_url(mut self, url: &str) -> Self {
        url.clone_into(&mut self.api_url);
        self
    }

    /// Sets the document host.
    #[must_use]
    pub fn with_file_host(mut self, host: &str) -> Self {
        host.trim_end_matches('/').clone_into(&mut self.file_host);
        self
    }

    /// Sets the source label.
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        source.clone_into(&mut self.source);
        self
    }

    /// Sets the politeness delay in milliseconds.
    #[must_use]
    pub const fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }
}
