//! Retrying, cookie-bearing upstream HTTP client (spec Module D).
//!
//! Grounded on the teacher's newer `HttpBackend` (`src/backends/http.rs`):
//! a thin wrapper around a shared `reqwest::Client`, built once and cloned
//! cheaply per request. The retry/backoff schedule is ported from
//! `original_source/twms/fetchers.py`'s `prepare_opener` decorator
//! (`tries=4, delay=3, backoff=2`, i.e. 3 retries after the first attempt).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};

use crate::error::TwmsResult;

/// Number of attempts after the first that a transport-level failure gets
/// retried.
const MAX_RETRIES: u32 = 3;
/// Initial backoff delay; doubles after every retry.
const INITIAL_DELAY: Duration = Duration::from_secs(3);

/// The outcome of fetching one upstream URL.
#[derive(Debug)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// A shared, cookie-aware HTTP client used by every [`Fetcher`].
///
/// [`Fetcher`]: crate::fetcher::Fetcher
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
}

impl HttpSession {
    /// Builds a session with an in-memory cookie jar, matching the source's
    /// `http.cookiejar.CookieJar`-backed opener.
    ///
    /// # Errors
    /// Returns an error if the underlying TLS backend fails to initialize.
    pub fn new() -> TwmsResult<Self> {
        let client = Client::builder().cookie_store(true).build()?;
        Ok(Self { client })
    }

    /// Fetches `url`, retrying transport failures (timeouts, connection
    /// resets, DNS errors) with exponential backoff. A successful transport
    /// round-trip is returned regardless of HTTP status: callers interpret
    /// 4xx/5xx themselves, since some upstreams use a status code as a
    /// dead-tile signal rather than a transport error (spec §4.3).
    ///
    /// # Errors
    /// Returns the last transport error if every attempt fails.
    pub async fn fetch(&self, url: &str, headers: &[(Arc<str>, Arc<str>)]) -> TwmsResult<FetchedResponse> {
        let mut delay = INITIAL_DELAY;
        let mut attempt = 0;
        loop {
            match self.try_once(url, headers).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    log::warn!("fetch attempt {attempt} for {url} failed: {err}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn try_once(&self, url: &str, headers: &[(Arc<str>, Arc<str>)]) -> reqwest::Result<FetchedResponse> {
        let mut req = self.client.get(url);
        for (name, value) in headers {
            req = req.header(name.as_ref(), value.as_ref());
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        Ok(FetchedResponse { status, body })
    }
}
