//! Splitting a scrape window into bounded periods.
//!
//! The filter API cannot be queried over long spans, so a window is cut
//! into consecutive periods of at most [`PERIOD_MONTHS`] months. Periods
//! come out newest first so the most recent data is refreshed earliest in
//! a run that may be interrupted.

use std::iter::FusedIterator;

use chrono::{Months, NaiveDate};
use maya_notification_models::{Period, ScrapeWindow};

/// Maximum length of a single period, in calendar months.
pub const PERIOD_MONTHS: u32 = 6;

/// Lazy iterator over the [`Period`]s of a window, newest first.
///
/// Adjacent periods share their boundary day: the `start` of one period is
/// the `end` of the next one yielded.
#[derive(Debug, Clone)]
pub struct PeriodSplitter {
    from: NaiveDate,
    end: Option<NaiveDate>,
}

impl PeriodSplitter {
    /// Creates a splitter over `window`.
    #[must_use]
    pub const fn new(window: ScrapeWindow) -> Self {
        Self {
            from: window.from,
            end: Some(window.to),
        }
    }
}

impl Iterator for PeriodSplitter {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        let end = self.end?;

        match end.checked_sub_months(Months::new(PERIOD_MONTHS)) {
            Some(start) if start > self.from => {
                self.end = Some(start);
                Some(Period { start, end })
            }
            _ => {
                self.end = None;
                Some(Period {
                    start: self.from,
                    end,
                })
            }
        }
    }
}

impl FusedIterator for PeriodSplitter {}

/// Splits `window` into periods of at most six months, newest first.
#[must_use]
pub const fn split_period(window: ScrapeWindow) -> PeriodSplitter {
    PeriodSplitter::new(window)
}
