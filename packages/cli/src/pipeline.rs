//! The `scrape` subcommand.
//!
//! Resolves the scrape window from the store watermark, streams records
//! from the Maya API and fans them out to the configured sinks. A run
//! ends when the window is exhausted, the record limit is reached, the
//! time limit expires, or the first error occurs; in every case the
//! records already received are flushed before returning.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use clap::Args;
use futures::StreamExt;
use maya_cli_utils::{MultiProgress, records_spinner};
use maya_database::notification_db::{self, RunStatus};
use maya_database::{NotificationStore, paths};
use maya_notification_models::ScrapeWindow;
use maya_scraper::watermark::resolve_window;
use maya_scraper::{MayaApiFetcher, ReportFetcher, ScrapeConfig, scrape};

use crate::sink::{SinkStats, Sinks};

/// Options for a scrape run.
#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Database file (defaults to `$MAYA_DB_PATH` or `data/maya_notifications.duckdb`)
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Also write records as newline-delimited JSON to this file (`-` for stdout)
    #[arg(long)]
    pub output: Option<String>,
    /// Do not write to the database
    #[arg(long)]
    pub no_store: bool,
    /// Stop after this many records
    #[arg(long)]
    pub limit: Option<u64>,
    /// Stop after this many seconds
    #[arg(long)]
    pub max_duration_secs: Option<u64>,
    /// Start date (YYYY-MM-DD), overriding the watermark
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// End date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    pub to: Option<NaiveDate>,
    /// Pause after every API call, in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

/// Returns the database path from `--db` or the default location.
#[must_use]
pub fn db_path(db: Option<PathBuf>) -> PathBuf {
    paths::resolve_db_path(db)
}

/// Resolves the window from the store at `path`, tolerating a missing or
/// unreadable store.
#[must_use]
pub fn watermark_window(path: &Path, source: &str, today: NaiveDate) -> ScrapeWindow {
    let store = match NotificationStore::connect(path) {
        Ok(store) => Some(store),
        Err(e) => {
            log::warn!("No usable store at {}: {e}", path.display());
            None
        }
    };
    resolve_window(store.as_ref(), source, today)
}

/// Applies `--from`/`--to` on top of the resolved window.
///
/// # Errors
///
/// Returns an error if the resulting start date is after the end date.
pub fn apply_overrides(
    resolved: ScrapeWindow,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<ScrapeWindow, String> {
    let from = from.unwrap_or(resolved.from);
    let to = to.unwrap_or(resolved.to);
    ScrapeWindow::new(from, to).ok_or_else(|| format!("Start date {from} is after end date {to}"))
}

fn open_output(output: Option<&str>) -> std::io::Result<Option<Box<dyn Write>>> {
    Ok(match output {
        None => None,
        Some("-") => Some(Box::new(BufWriter::new(std::io::stdout().lock()))),
        Some(path) => Some(Box::new(BufWriter::new(File::create(path)?))),
    })
}

/// When a run stops pulling records before the window is exhausted.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    /// Stop after this many records.
    pub max_records: Option<u64>,
    /// Stop pulling once this instant has passed.
    pub deadline: Option<Instant>,
}

impl RunLimits {
    /// Builds the limits of a run starting at `start`.
    #[must_use]
    pub fn from_args(args: &ScrapeArgs, start: Instant) -> Self {
        Self {
            max_records: args.limit,
            deadline: args
                .max_duration_secs
                .map(|secs| start + Duration::from_secs(secs)),
        }
    }
}

/// Pulls records into `sinks` until the stream ends or a limit is hit.
///
/// Limits are checked before every pull, so an in-flight fetch (and its
/// politeness delay) always runs to completion.
async fn drain<F: ReportFetcher>(
    fetcher: &F,
    config: &ScrapeConfig,
    window: ScrapeWindow,
    limits: RunLimits,
    sinks: &mut Sinks,
    on_record: &impl Fn(),
) -> Result<RunStatus, Box<dyn std::error::Error>> {
    let mut records = pin!(scrape(fetcher, config, window));
    let mut pulled = 0u64;

    loop {
        if limits.max_records.is_some_and(|max| pulled >= max) {
            log::info!("Record limit of {pulled} reached, stopping");
            return Ok(RunStatus::Stopped);
        }
        if let Some(deadline) = limits.deadline
            && Instant::now() >= deadline
        {
            log::warn!("Time limit reached after {pulled} records, stopping");
            return Ok(RunStatus::Stopped);
        }

        let Some(record) = records.next().await else {
            return Ok(RunStatus::Completed);
        };
        sinks.push(record?)?;
        pulled += 1;
        on_record();
    }
}

/// Scrapes `window` into `sinks`, then flushes them and records how the
/// run ended.
///
/// # Errors
///
/// Returns the error that ended the scrape, after everything received
/// before it has been written, or an error from the final flush.
pub async fn scrape_into<F: ReportFetcher>(
    fetcher: &F,
    config: &ScrapeConfig,
    window: ScrapeWindow,
    limits: RunLimits,
    mut sinks: Sinks,
    on_record: impl Fn(),
) -> Result<SinkStats, Box<dyn std::error::Error>> {
    let outcome = drain(fetcher, config, window, limits, &mut sinks, &on_record).await;

    let (status, error) = match &outcome {
        Ok(status) => (*status, None),
        Err(e) => (RunStatus::Failed, Some(e.to_string())),
    };
    let stats = sinks.finish(&config.source, status, error.as_deref())?;

    if let Some(e) = &error {
        log::error!("Scrape stopped early: {e}");
    }
    outcome.map(|_| stats)
}

/// Runs one scrape.
///
/// # Errors
///
/// Returns an error if the window overrides are inconsistent, a sink
/// cannot be opened, or the scrape fails. Records received before a
/// scrape failure are still written.
pub async fn run(args: ScrapeArgs, multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let limits = RunLimits::from_args(&args, start);

    let mut config = ScrapeConfig::new();
    if let Some(ms) = args.delay_ms {
        config = config.with_delay_ms(ms);
    }

    let path = db_path(args.db.clone());
    let today = chrono::Local::now().date_naive();
    let resolved = if args.from.is_some() {
        ScrapeWindow {
            from: today,
            to: today,
        }
    } else {
        watermark_window(&path, &config.source, today)
    };
    let window = apply_overrides(resolved, args.from, args.to)?;
    log::info!("Scrape window: {window}");

    let store = if args.no_store {
        None
    } else {
        log::info!("Writing to {}", path.display());
        Some(notification_db::open(&path)?)
    };
    let ndjson = open_output(args.output.as_deref())?;
    if store.is_none() && ndjson.is_none() {
        log::warn!("Neither a store nor an output file is configured; records will be discarded");
    }

    let fetcher = MayaApiFetcher::new(config)?;
    let sinks = Sinks::new(store, ndjson);

    let bar = records_spinner(multi, "Scraping");
    let result = scrape_into(
        &fetcher,
        fetcher.config(),
        window,
        limits,
        sinks,
        || bar.inc(1),
    )
    .await;
    bar.finish_and_clear();

    let stats = result?;
    log::info!(
        "Scrape complete in {:.1}s: {} records received, {} new in store",
        start.elapsed().as_secs_f64(),
        stats.received,
        stats.inserted,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use maya_database::Connection;
    use maya_notification_models::Period;
    use maya_scraper::{FetchFailure, ScrapeError};
    use serde_json::json;

    use super::*;

    /// Serves `pages` in call order, then fails or runs dry.
    struct ScriptedFetcher {
        pages: Mutex<Vec<Vec<serde_json::Value>>>,
        fail_when_dry: bool,
        calls: Mutex<u32>,
    }

    impl ScriptedFetcher {
        fn new(pages: Vec<Vec<serde_json::Value>>, fail_when_dry: bool) -> Self {
            Self {
                pages: Mutex::new(pages.into_iter().rev().collect()),
                fail_when_dry,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl ReportFetcher for ScriptedFetcher {
        async fn fetch_page(
            &self,
            period: &Period,
            page: u32,
        ) -> Result<Vec<serde_json::Value>, ScrapeError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.pages.lock().unwrap().pop();
            match next {
                Some(reports) => Ok(reports),
                None if self.fail_when_dry => Err(ScrapeError::Fetch {
                    period: *period,
                    page,
                    source: FetchFailure::Decode(
                        serde_json::from_str::<serde_json::Value>("<html>").unwrap_err(),
                    ),
                }),
                None => Ok(vec![]),
            }
        }
    }

    fn report(id: u64) -> serde_json::Value {
        json!({"PubDate": "2024-01-10T09:00:00", "RptCode": id, "Files": []})
    }

    fn one_period_window() -> ScrapeWindow {
        ScrapeWindow::new(date(2024, 1, 1), date(2024, 2, 1)).unwrap()
    }

    /// A store plus a second handle on it that survives the sink.
    fn store() -> (Connection, Connection) {
        let conn = Connection::open_in_memory().unwrap();
        notification_db::create_schema(&conn).unwrap();
        let reader = conn.try_clone().unwrap();
        (conn, reader)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn overrides_replace_either_bound() {
        let resolved = ScrapeWindow::new(date(2024, 1, 1), date(2024, 6, 1)).unwrap();

        let window = apply_overrides(resolved, Some(date(2023, 1, 1)), None).unwrap();
        assert_eq!(window.from, date(2023, 1, 1));
        assert_eq!(window.to, date(2024, 6, 1));

        let window = apply_overrides(resolved, None, Some(date(2024, 3, 1))).unwrap();
        assert_eq!(window.from, date(2024, 1, 1));
        assert_eq!(window.to, date(2024, 3, 1));

        assert_eq!(apply_overrides(resolved, None, None).unwrap(), resolved);
    }

    #[test]
    fn inverted_overrides_are_rejected() {
        let resolved = ScrapeWindow::new(date(2024, 1, 1), date(2024, 6, 1)).unwrap();
        let err = apply_overrides(resolved, Some(date(2024, 7, 1)), None).unwrap_err();
        assert!(err.contains("2024-07-01"));
    }

    #[test]
    fn missing_store_falls_back_to_lookback() {
        let today = date(2024, 10, 19);
        let window = watermark_window(
            Path::new("/nonexistent/maya_notifications.duckdb"),
            "maya.tase.co.il",
            today,
        );
        assert_eq!(window.from, date(2024, 7, 19));
        assert_eq!(window.to, today);
    }

    #[test]
    fn explicit_db_path_wins() {
        assert_eq!(
            db_path(Some(PathBuf::from("/tmp/x.duckdb"))),
            PathBuf::from("/tmp/x.duckdb")
        );
    }

    #[tokio::test]
    async fn completed_run_marks_store_synced() {
        let fetcher = ScriptedFetcher::new(vec![vec![report(1_500_001), report(1_500_002)]], false);
        let (conn, reader) = store();
        let config = ScrapeConfig::new();

        let stats = scrape_into(
            &fetcher,
            &config,
            one_period_window(),
            RunLimits::default(),
            Sinks::new(Some(conn), None),
            || {},
        )
        .await
        .unwrap();

        assert_eq!(stats.received, 2);
        assert_eq!(fetcher.calls(), 2);
        let state = notification_db::sync_state(&reader).unwrap();
        assert_eq!(state.record_count, 2);
        assert_eq!(state.last_run_status.as_deref(), Some("completed"));
        assert!(state.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn failed_run_keeps_records_without_marking_synced() {
        let fetcher = ScriptedFetcher::new(vec![vec![report(1_500_001)]], true);
        let (conn, reader) = store();
        let config = ScrapeConfig::new();

        let err = scrape_into(
            &fetcher,
            &config,
            one_period_window(),
            RunLimits::default(),
            Sinks::new(Some(conn), None),
            || {},
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("page_num:1"));
        let state = notification_db::sync_state(&reader).unwrap();
        assert_eq!(state.record_count, 1);
        assert_eq!(state.last_synced_at, None);
        assert_eq!(state.last_run_status.as_deref(), Some("failed"));
        assert!(state.last_run_error.unwrap().contains("date_from:2024-01-01"));
    }

    #[tokio::test]
    async fn failure_on_first_page_leaves_store_unsynced() {
        let fetcher = ScriptedFetcher::new(vec![], true);
        let (conn, reader) = store();
        let config = ScrapeConfig::new();

        let result = scrape_into(
            &fetcher,
            &config,
            one_period_window(),
            RunLimits::default(),
            Sinks::new(Some(conn), None),
            || {},
        )
        .await;

        assert!(result.is_err());
        let state = notification_db::sync_state(&reader).unwrap();
        assert_eq!(state.record_count, 0);
        assert_eq!(state.last_synced_at, None);
    }

    #[tokio::test]
    async fn record_limit_stops_between_records() {
        let fetcher = ScriptedFetcher::new(
            vec![vec![report(1_500_001), report(1_500_002), report(1_500_003)]],
            false,
        );
        let (conn, reader) = store();
        let config = ScrapeConfig::new();
        let limits = RunLimits {
            max_records: Some(2),
            deadline: None,
        };

        let stats = scrape_into(
            &fetcher,
            &config,
            one_period_window(),
            limits,
            Sinks::new(Some(conn), None),
            || {},
        )
        .await
        .unwrap();

        assert_eq!(stats.received, 2);
        assert_eq!(fetcher.calls(), 1);
        let state = notification_db::sync_state(&reader).unwrap();
        assert_eq!(state.last_run_status.as_deref(), Some("stopped"));
        assert_eq!(state.last_synced_at, None);
    }

    #[tokio::test]
    async fn expired_deadline_stops_before_any_fetch() {
        let fetcher = ScriptedFetcher::new(vec![vec![report(1_500_001)]], false);
        let config = ScrapeConfig::new();
        let limits = RunLimits {
            max_records: None,
            deadline: Some(Instant::now()),
        };

        let stats = scrape_into(
            &fetcher,
            &config,
            one_period_window(),
            limits,
            Sinks::new(None, None),
            || {},
        )
        .await
        .unwrap();

        assert_eq!(stats.received, 0);
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn limits_come_from_args() {
        let start = Instant::now();
        let args = ScrapeArgs {
            db: None,
            output: None,
            no_store: false,
            limit: Some(10),
            max_duration_secs: Some(30),
            from: None,
            to: None,
            delay_ms: None,
        };

        let limits = RunLimits::from_args(&args, start);
        assert_eq!(limits.max_records, Some(10));
        assert_eq!(limits.deadline, Some(start + Duration::from_secs(30)));
    }
}
