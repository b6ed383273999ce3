//! Driving periods and pages into a single record stream.
//!
//! For each period (newest first) pages are requested from zero upwards
//! until one comes back empty, and every report on a non-empty page is
//! mapped and yielded straight away. The first error ends the stream, so
//! a failed run leaves a prefix of fully emitted periods behind it.

use futures::Stream;
use maya_notification_models::{NotificationRecord, ScrapeWindow};

use crate::fetch::ReportFetcher;
use crate::mapper::{decode_entry, map_entry};
use crate::period::split_period;
use crate::{ScrapeConfig, ScrapeError};

/// Scrapes every notification in `window` as a lazy stream.
///
/// Calls are made one at a time, only when the consumer polls for more
/// records; dropping the stream stops the run between fetches. The stream
/// cannot be restarted, a new run needs a freshly resolved window.
pub fn scrape<'a, F: ReportFetcher>(
    fetcher: &'a F,
    config: &'a ScrapeConfig,
    window: ScrapeWindow,
) -> impl Stream<Item = Result<NotificationRecord, ScrapeError>> + Send + 'a {
    async_stream::try_stream! {
        log::info!("Scraping {} from {window}", config.source);

        for period in split_period(window) {
            log::info!("Period {period}");

            let mut page: u32 = 0;
            loop {
                let reports = fetcher.fetch_page(&period, page).await?;
                if reports.is_empty() {
                    log::debug!("Period {period}: exhausted after {page} page(s)");
                    break;
                }

                log::debug!("Period {period} page {page}: {} reports", reports.len());

                for value in reports {
                    let entry = decode_entry(value)?;
                    let record = map_entry(&entry, config)?;
                    yield record;
                }

                page += 1;
            }
        }

        log::info!("Scrape of {window} complete");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::pin::pin;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use futures::StreamExt;
    use maya_notification_models::Period;
    use serde_json::json;

    use super::*;
    use crate::FetchFailure;

    /// Serves canned pages and records every call it receives.
    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<(Period, u32), Vec<serde_json::Value>>,
        fail_on: Option<(Period, u32)>,
        calls: Mutex<Vec<(Period, u32)>>,
    }

    impl FakeFetcher {
        fn with_page(mut self, period: Period, page: u32, reports: Vec<serde_json::Value>) -> Self {
            self.pages.insert((period, page), reports);
            self
        }

        fn failing_on(mut self, period: Period, page: u32) -> Self {
            self.fail_on = Some((period, page));
            self
        }

        fn calls(&self) -> Vec<(Period, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ReportFetcher for FakeFetcher {
        async fn fetch_page(
            &self,
            period: &Period,
            page: u32,
        ) -> Result<Vec<serde_json::Value>, ScrapeError> {
            self.calls.lock().unwrap().push((*period, page));
            if self.fail_on == Some((*period, page)) {
                return Err(ScrapeError::Fetch {
                    period: *period,
                    page,
                    source: FetchFailure::Decode(
                        serde_json::from_str::<serde_json::Value>("").unwrap_err(),
                    ),
                });
            }
            Ok(self.pages.get(&(*period, page)).cloned().unwrap_or_default())
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A window that splits into exactly [`newer`, `older`].
    fn two_period_window() -> (ScrapeWindow, Period, Period) {
        let window = ScrapeWindow::new(date(2023, 10, 1), date(2024, 10, 1)).unwrap();
        let newer = Period {
            start: date(2024, 4, 1),
            end: date(2024, 10, 1),
        };
        let older = Period {
            start: date(2023, 10, 1),
            end: date(2024, 4, 1),
        };
        (window, newer, older)
    }

    fn report(id: u64, pub_date: &str) -> serde_json::Value {
        json!({"PubDate": pub_date, "RptCode": id, "Files": [{"Name": "r.pdf", "Type": 2}]})
    }

    async fn collect(
        fetcher: &FakeFetcher,
        window: ScrapeWindow,
    ) -> Vec<Result<NotificationRecord, ScrapeError>> {
        let config = ScrapeConfig::new();
        scrape(fetcher, &config, window).collect().await
    }

    #[tokio::test]
    async fn yields_newest_period_first() {
        let (window, newer, older) = two_period_window();
        let fetcher = FakeFetcher::default()
            .with_page(older, 0, vec![report(1_100_200, "2024-01-10T09:00:00")])
            .with_page(newer, 0, vec![report(1_200_300, "2024-07-10T09:00:00")]);

        let records: Vec<NotificationRecord> = collect(&fetcher, window)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].document_url,
            "https://mayafiles.tase.co.il/RHtm/1200001-1201000/H1200300.htm"
        );
        assert_eq!(
            records[1].document_url,
            "https://mayafiles.tase.co.il/RHtm/1100001-1101000/H1100200.htm"
        );
        assert_ne!(records[0].document_url, records[1].document_url);

        assert_eq!(
            fetcher.calls(),
            vec![(newer, 0), (newer, 1), (older, 0), (older, 1)]
        );
    }

    #[tokio::test]
    async fn empty_first_page_advances_to_next_period() {
        let (window, newer, older) = two_period_window();
        let fetcher = FakeFetcher::default()
            .with_page(older, 0, vec![report(1_100_200, "2024-01-10T09:00:00")]);

        let results = collect(&fetcher, window).await;

        assert_eq!(results.len(), 1);
        assert_eq!(fetcher.calls(), vec![(newer, 0), (older, 0), (older, 1)]);
    }

    #[tokio::test]
    async fn pages_through_a_period_in_order() {
        let window = ScrapeWindow::new(date(2024, 1, 1), date(2024, 3, 1)).unwrap();
        let period = Period {
            start: date(2024, 1, 1),
            end: date(2024, 3, 1),
        };
        let fetcher = FakeFetcher::default()
            .with_page(
                period,
                0,
                vec![
                    report(1_500_003, "2024-02-20T10:00:00"),
                    report(1_500_002, "2024-02-19T10:00:00"),
                ],
            )
            .with_page(period, 1, vec![report(1_500_001, "2024-02-18T10:00:00")]);

        let ids: Vec<String> = collect(&fetcher, window)
            .await
            .into_iter()
            .map(|r| r.unwrap().storage_path)
            .collect();

        assert_eq!(
            ids,
            vec![
                "maya.tase.co.il/2024_02/1500003.htm",
                "maya.tase.co.il/2024_02/1500002.htm",
                "maya.tase.co.il/2024_02/1500001.htm",
            ]
        );
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_ends_stream_after_completed_periods() {
        let (window, newer, older) = two_period_window();
        let fetcher = FakeFetcher::default()
            .with_page(newer, 0, vec![report(1_200_300, "2024-07-10T09:00:00")])
            .with_page(older, 0, vec![report(1_100_200, "2024-01-10T09:00:00")])
            .failing_on(older, 0);

        let config = ScrapeConfig::new();
        let mut stream = pin!(scrape(&fetcher, &config, window));

        assert!(stream.next().await.unwrap().is_ok());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch { page: 0, .. }));
        assert!(err.to_string().contains("date_from:2023-10-01"));
        assert!(stream.next().await.is_none());

        assert_eq!(fetcher.calls(), vec![(newer, 0), (newer, 1), (older, 0)]);
    }

    #[tokio::test]
    async fn malformed_entry_stops_the_stream() {
        let window = ScrapeWindow::new(date(2024, 1, 1), date(2024, 3, 1)).unwrap();
        let period = Period {
            start: date(2024, 1, 1),
            end: date(2024, 3, 1),
        };
        let fetcher = FakeFetcher::default().with_page(
            period,
            0,
            vec![
                report(1_500_003, "2024-02-20T10:00:00"),
                json!({"PubDate": "2024-02-19T10:00:00"}),
                report(1_500_001, "2024-02-18T10:00:00"),
            ],
        );

        let results = collect(&fetcher, window).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ScrapeError::MalformedEntry { .. })));
        assert_eq!(fetcher.calls(), vec![(period, 0)]);
    }

    #[tokio::test]
    async fn nothing_is_fetched_until_polled() {
        let (window, ..) = two_period_window();
        let fetcher = FakeFetcher::default();
        let config = ScrapeConfig::new();

        let stream = scrape(&fetcher, &config, window);
        assert!(fetcher.calls().is_empty());
        drop(stream);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn consumer_can_stop_early() {
        let (window, newer, _) = two_period_window();
        let fetcher = FakeFetcher::default().with_page(
            newer,
            0,
            vec![
                report(1_200_300, "2024-07-10T09:00:00"),
                report(1_200_301, "2024-07-11T09:00:00"),
            ],
        );
        let config = ScrapeConfig::new();

        let taken: Vec<_> = scrape(&fetcher, &config, window).take(1).collect().await;

        assert_eq!(taken.len(), 1);
        assert_eq!(fetcher.calls(), vec![(newer, 0)]);
    }
}
