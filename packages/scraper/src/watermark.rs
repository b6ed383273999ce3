//! Resolving the date window of a run from previously stored records.

use chrono::{Months, NaiveDate};
use maya_notification_models::ScrapeWindow;

/// How far before the earliest known record (or today) a run starts.
///
/// Documents published or republished near the known boundary are
/// re-checked without rescanning the full history.
pub const LOOKBACK_MONTHS: u32 = 3;

/// A store that knows the earliest record already scraped for a source.
pub trait WatermarkStore {
    /// Error returned when the store cannot be queried.
    type Error: std::fmt::Display;

    /// Returns the earliest record date for `source`, or `None` if the
    /// store holds no records for it.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the store is unreachable or not yet
    /// initialised.
    fn earliest_record_date(&self, source: &str) -> Result<Option<NaiveDate>, Self::Error>;
}

/// Resolves the window to scrape.
///
/// The floor is [`LOOKBACK_MONTHS`] before the earliest stored record, or
/// before `today` when there is no store, the store fails, or it holds no
/// records. The ceiling is always `today`. Store failures are logged and
/// never propagated.
#[must_use]
pub fn resolve_window<S: WatermarkStore + ?Sized>(
    store: Option<&S>,
    source: &str,
    today: NaiveDate,
) -> ScrapeWindow {
    let anchor = match store.map(|s| s.earliest_record_date(source)) {
        Some(Ok(Some(earliest))) => {
            log::info!("{source}: earliest stored record is {earliest}");
            earliest
        }
        Some(Ok(None)) => {
            log::info!("{source}: no stored records, using default window");
            today
        }
        Some(Err(e)) => {
            log::warn!("{source}: watermark unavailable ({e}), using default window");
            today
        }
        None => today,
    };

    let from = anchor
        .checked_sub_months(Months::new(LOOKBACK_MONTHS))
        .unwrap_or(NaiveDate::MIN)
        .min(today);

    let window = ScrapeWindow { from, to: today };
    log::info!("Scrape Maya from {window}");
    window
}
