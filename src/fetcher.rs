//! HTTP fetching with per-host rate limiting and bounded retry.
//!
//! # Architecture
//!
//! - [`HttpGet`]: the transport seam; one GET, no retries
//! - [`ReqwestClient`]: production transport over `reqwest`
//! - [`Fetcher`]: wraps any transport with rate limiting and retry
//!
//! Every attempt is classified into an [`Attempt`]: success, retryable
//! failure or fatal failure. The retry loop consumes those outcomes.
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Retryable: connect errors, timeouts, HTTP 429 and any 5xx.
//! Everything else fails immediately.

use crate::config::{RetryPolicy, ScraperConfig};
use crate::error::{Result, ScrapeError};
use rand::{rng, Rng};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// 429 and every 5xx are transient.
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// A completed HTTP exchange, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("image"))
    }
}

/// Outcome of a single request attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Success(T),
    Retryable(ScrapeError),
    Fatal(ScrapeError),
}

/// One HTTP GET with no retry logic.
///
/// Transport errors that are worth retrying (timeouts, refused connections)
/// must be returned as [`ScrapeError::Network`] with `retryable: true`.
pub trait HttpGet {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Production transport.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
        );
        if let Ok(referer) = reqwest::header::HeaderValue::from_str(&format!("{}/", config.base_url)) {
            headers.insert(reqwest::header::REFERER, referer);
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| ScrapeError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpGet for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let transient = |e: &reqwest::Error| e.is_timeout() || e.is_connect() || e.is_request();

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::network(url, &e, transient(&e)))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| ScrapeError::network(url, &e, transient(&e)))?;

        Ok(HttpResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Sleep-based minimum spacing between consecutive requests to the same host.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next slot for `host` and return how long to wait for it.
    fn reserve(&self, host: &str) -> Duration {
        let now = Instant::now();
        let mut map = match self.last_request.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = match map.get(host) {
            Some(last) => (*last + self.min_interval).max(now),
            None => now,
        };
        map.insert(host.to_string(), slot);
        slot - now
    }

    pub async fn wait(&self, url: &str) {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let delay = self.reserve(&host);
        if !delay.is_zero() {
            debug!(%host, ?delay, "Rate limiting");
            sleep(delay).await;
        }
    }
}

/// Rate-limited, retrying wrapper around an [`HttpGet`] transport.
pub struct Fetcher<C> {
    inner: C,
    policy: RetryPolicy,
    limiter: RateLimiter,
    max_jitter_ms: u64,
}

impl<C> fmt::Debug for Fetcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("policy", &self.policy)
            .field("limiter", &self.limiter)
            .field("max_jitter_ms", &self.max_jitter_ms)
            .finish()
    }
}

impl<C: HttpGet> Fetcher<C> {
    pub fn new(inner: C, policy: RetryPolicy, min_interval: Duration) -> Self {
        Self {
            inner,
            policy,
            limiter: RateLimiter::new(min_interval),
            max_jitter_ms: 250,
        }
    }

    pub fn from_config(inner: C, config: &ScraperConfig) -> Self {
        Self::new(inner, config.retry, config.rate_limit())
    }

    /// Disable random jitter (deterministic delays).
    #[cfg(test)]
    pub fn without_jitter(mut self) -> Self {
        self.max_jitter_ms = 0;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[cfg(test)]
    pub fn transport(&self) -> &C {
        &self.inner
    }

    /// Perform one rate-limited attempt and classify it.
    pub async fn attempt(&self, url: &str) -> Attempt<HttpResponse> {
        self.limiter.wait(url).await;
        match self.inner.get(url).await {
            Ok(resp) if (200..300).contains(&resp.status) => Attempt::Success(resp),
            Ok(resp) if is_retryable_status(resp.status) => Attempt::Retryable(
                ScrapeError::network(url, format!("HTTP {}", resp.status), true),
            ),
            Ok(resp) => Attempt::Fatal(ScrapeError::network(
                url,
                format!("HTTP {}", resp.status),
                false,
            )),
            Err(e) if e.is_retryable() => Attempt::Retryable(e),
            Err(e) => Attempt::Fatal(e),
        }
    }

    /// GET `url`, retrying transient failures per the policy.
    ///
    /// Each retry waits `min(base * 2^(n-1), max)` plus up to 250 ms of
    /// jitter. Non-retryable failures return immediately.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL to fetch
    ///
    /// # Returns
    ///
    /// The 2xx response.
    ///
    /// # Errors
    ///
    /// [`ScrapeError::Network`] once retries are exhausted or on a
    /// non-retryable failure; `retryable` tells which.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch(&self, url: &str) -> Result<HttpResponse> {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.attempt(url).await {
                Attempt::Success(resp) => {
                    debug!(attempt, bytes = resp.body.len(), "Fetched");
                    return Ok(resp);
                }
                Attempt::Fatal(e) => {
                    warn!(attempt, error = %e, "Non-retryable fetch failure");
                    return Err(e);
                }
                Attempt::Retryable(e) => {
                    if attempt >= self.policy.max_attempts {
                        error!(
                            attempt,
                            max = self.policy.max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis(),
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let jitter_ms: u64 = if self.max_jitter_ms == 0 {
                        0
                    } else {
                        rng().random_range(0..=self.max_jitter_ms)
                    };
                    let delay = self.policy.delay_for(attempt) + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// GET `url` and decode the body as text.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        Ok(self.fetch(url).await?.text())
    }
}
