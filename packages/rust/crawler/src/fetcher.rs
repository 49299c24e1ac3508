//! Page fetching with tiered retry/backoff and politeness delays.
//!
//! The retry tiers reflect how the target sites actually fail: ordinary
//! 5xx statuses clear in seconds, while abrupt transport/TLS terminations
//! correlate with upstream throttling and need a long cool-down before the
//! next attempt has any chance of succeeding. A 404 is terminal for the
//! node within the run; the node is retried on the next full invocation.

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use floracrawl_shared::{FloraCrawlError, Politeness, Result, RetryPolicy};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("FloraCrawl/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// FetchOutcome
// ---------------------------------------------------------------------------

/// Outcome of fetching one page.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// HTTP 200; the raw response body.
    Content(String),
    /// The page could not be fetched this run.
    Failed(FetchFailure),
}

/// Why a page fetch gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// HTTP 404 — terminal for this node, not retried within the run.
    NotFound,
    /// The attempt bound was exhausted without a success.
    Exhausted,
}

/// How one attempt ended, internally.
enum Attempt {
    Ok(String),
    NotFound,
    BadStatus(StatusCode),
    Throttled(reqwest::Error),
    Failed(reqwest::Error),
}

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// HTTP page fetcher with tiered retries and a per-call politeness delay.
pub struct PageFetcher {
    client: Client,
    retry: RetryPolicy,
    politeness: Politeness,
}

impl PageFetcher {
    /// Build a fetcher with the given retry policy, politeness range, and
    /// request timeout.
    pub fn new(retry: RetryPolicy, politeness: Politeness, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| FloraCrawlError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            retry,
            politeness,
        })
    }

    /// Fetch `url`, retrying per the tiered policy.
    ///
    /// The politeness delay is slept after every fetch — successful or
    /// failed — before the outcome is returned, bounding the request rate
    /// against the target site.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let outcome = self.fetch_with_retries(url).await;
        self.politeness_delay().await;
        outcome
    }

    async fn fetch_with_retries(&self, url: &str) -> FetchOutcome {
        for attempt in 1..=self.retry.attempts {
            let backoff = match self.attempt(url).await {
                Attempt::Ok(body) => {
                    debug!(url, attempt, bytes = body.len(), "page fetched");
                    return FetchOutcome::Content(body);
                }
                Attempt::NotFound => {
                    warn!(url, "404 Not Found");
                    return FetchOutcome::Failed(FetchFailure::NotFound);
                }
                Attempt::BadStatus(status) => {
                    warn!(url, attempt, %status, "unexpected HTTP status");
                    self.retry.status_backoff
                }
                Attempt::Throttled(e) => {
                    warn!(url, attempt, error = %e, "abrupt transport termination, cooling down");
                    self.retry.throttle_backoff
                }
                Attempt::Failed(e) => {
                    warn!(url, attempt, error = %e, "fetch attempt failed");
                    self.retry.error_backoff
                }
            };

            if attempt < self.retry.attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        warn!(url, attempts = self.retry.attempts, "page fetch exhausted retries");
        FetchOutcome::Failed(FetchFailure::Exhausted)
    }

    async fn attempt(&self, url: &str) -> Attempt {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::OK {
                    match response.text().await {
                        Ok(body) => Attempt::Ok(body),
                        Err(e) => classify(e),
                    }
                } else if status == StatusCode::NOT_FOUND {
                    Attempt::NotFound
                } else {
                    Attempt::BadStatus(status)
                }
            }
            Err(e) => classify(e),
        }
    }

    async fn politeness_delay(&self) {
        let max = self.politeness.max_delay;
        if max.is_zero() {
            return;
        }
        let min_ms = self.politeness.min_delay.as_millis() as u64;
        let max_ms = max.as_millis() as u64;
        let ms = if min_ms >= max_ms {
            max_ms
        } else {
            rand::rng().random_range(min_ms..=max_ms)
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Sort a transport error into its backoff tier.
fn classify(err: reqwest::Error) -> Attempt {
    if is_abrupt_termination(&err) {
        Attempt::Throttled(err)
    } else {
        Attempt::Failed(err)
    }
}

/// Whether an error looks like the peer tearing the connection down
/// mid-exchange rather than an ordinary transient failure.
fn is_abrupt_termination(err: &reqwest::Error) -> bool {
    if err.is_connect() {
        return true;
    }
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("unexpected eof")
            || text.contains("connection reset")
            || text.contains("broken pipe")
            || text.contains("handshake")
        {
            return true;
        }
        source = cause.source();
    }
    false
}
