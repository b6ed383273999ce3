//! Page fetching against the Maya filter API.
//!
//! [`ReportFetcher`] is the seam the orchestrator drives. The production
//! implementation, [`MayaApiFetcher`], posts one filter request per call
//! on a single shared session, clears the session cookies before each
//! call, and sleeps for the politeness delay after each call whether or
//! not it succeeded. Failures are wrapped with the period and page and
//! never retried here.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use maya_notification_models::Period;
use reqwest::Url;
use reqwest::cookie::CookieStore;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use crate::filter::filter_request;
use crate::{FetchFailure, ScrapeConfig, ScrapeError};

/// Fetches one page of raw report entries.
pub trait ReportFetcher: Send + Sync {
    /// Fetches zero-based `page` of `period`.
    ///
    /// Entries are returned undecoded. An empty list means the period is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Fetch`] if the request or response decoding
    /// fails.
    fn fetch_page(
        &self,
        period: &Period,
        page: u32,
    ) -> impl Future<Output = Result<Vec<serde_json::Value>, ScrapeError>> + Send;
}

/// In-memory cookie jar for a single-host session that can be cleared
/// between calls.
#[derive(Debug, Default)]
pub struct SessionCookies {
    cookies: Mutex<BTreeMap<String, String>>,
}

impl SessionCookies {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes every stored cookie.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Returns the number of stored cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no cookies are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl CookieStore for SessionCookies {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, _url: &Url) {
        let mut jar = self.lock();
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            let pair = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    jar.insert(name.to_owned(), value.trim().to_owned());
                }
            }
        }
    }

    fn cookies(&self, _url: &Url) -> Option<HeaderValue> {
        let jar = self.lock();
        if jar.is_empty() {
            return None;
        }
        let header = jar
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        HeaderValue::from_str(&header).ok()
    }
}

/// Response envelope of the filter endpoint.
#[derive(Debug, Deserialize)]
struct ReportPage {
    #[serde(rename = "Reports")]
    reports: Vec<serde_json::Value>,
}

/// Decodes a filter response body into its raw report entries.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the body is not JSON or has no
/// `Reports` array.
pub fn decode_page(body: &str) -> Result<Vec<serde_json::Value>, serde_json::Error> {
    serde_json::from_str::<ReportPage>(body).map(|page| page.reports)
}

/// Fixed headers sent with every filter request.
#[must_use]
pub fn maya_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-maya-with"),
        HeaderValue::from_static("allow"),
    );
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json;charset=UTF-8"),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers
}

/// [`ReportFetcher`] backed by the public Maya API.
#[derive(Debug)]
pub struct MayaApiFetcher {
    client: reqwest::Client,
    cookies: Arc<SessionCookies>,
    config: ScrapeConfig,
}

impl MayaApiFetcher {
    /// Creates a fetcher with its own HTTP session.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Client`] if the HTTP client cannot be built.
    pub fn new(config: ScrapeConfig) -> Result<Self, ScrapeError> {
        let cookies = Arc::new(SessionCookies::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .build()
            .map_err(ScrapeError::Client)?;

        Ok(Self {
            client,
            cookies,
            config,
        })
    }

    /// Returns the configuration this fetcher was built with.
    #[must_use]
    pub const fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Returns the session cookie jar.
    #[must_use]
    pub fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    async fn call(&self, period: &Period, page: u32) -> Result<Vec<serde_json::Value>, FetchFailure> {
        self.cookies.clear();

        let body = self
            .client
            .post(&self.config.api_url)
            .headers(maya_headers())
            .json(&filter_request(period, page))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(decode_page(&body)?)
    }
}

impl ReportFetcher for MayaApiFetcher {
    async fn fetch_page(
        &self,
        period: &Period,
        page: u32,
    ) -> Result<Vec<serde_json::Value>, ScrapeError> {
        log::debug!("Fetching {period} page {page}");

        let result = self.call(period, page).await;
        tokio::time::sleep(self.config.delay).await;

        result.map_err(|source| ScrapeError::Fetch {
            period: *period,
            page,
            source,
        })
    }
}
