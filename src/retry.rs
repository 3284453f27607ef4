/// Retry With Exponential Backoff
///
/// Every outbound provider call goes through `RetryPolicy::execute`:
/// - 2xx: returned immediately
/// - 429 / 502 / 503 / 504: retried up to `max_retries` times
/// - any other status: returned as-is, the caller decides
/// - network failures: retried with the same backoff
///
/// Delay between attempts honors a `Retry-After` header (seconds) when the
/// response carries one, otherwise `min(max_delay, base * 2^attempt + jitter)`
/// with jitter drawn from [0, 30%] of the exponential term.

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES, JITTER_FRACTION,
    PROVIDER_HTTP_TIMEOUT, RETRYABLE_STATUSES, USER_AGENT,
};
use crate::error::FetchError;
use crate::metrics;

/// What the retry loop needs to know about a response
pub trait RetryableResponse {
    fn status_code(&self) -> u16;
    fn retry_after(&self) -> Option<Duration>;
}

impl RetryableResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn retry_after(&self) -> Option<Duration> {
        parse_retry_after(self.headers())
    }
}

/// `Retry-After: <seconds>`; HTTP-date values are ignored
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            retryable_statuses: RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay before retry number `attempt + 1` (attempt counts from zero)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(63)));

        let jitter_factor = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        let jittered = exponential as f64 + exponential as f64 * jitter_factor;

        let capped = (jittered as u64).min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }

    /// Run `send` until it yields a final response or retries are exhausted.
    ///
    /// `label` names the provider in logs and metrics.
    pub async fn execute<F, Fut, R, E>(&self, label: &str, mut send: F) -> Result<R, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: RetryableResponse,
        E: Display,
    {
        let mut attempt: u32 = 0;

        loop {
            let delay = match send().await {
                Ok(response) => {
                    let status = response.status_code();
                    if (200..300).contains(&status) || !self.is_retryable(status) {
                        return Ok(response);
                    }

                    if attempt >= self.max_retries {
                        warn!(
                            provider = label,
                            status = status,
                            attempts = attempt + 1,
                            "Retries exhausted"
                        );
                        return Err(FetchError::RetriesExhausted {
                            status,
                            attempts: attempt + 1,
                        });
                    }

                    metrics::increment_provider_retries(label, &status.to_string());
                    response
                        .retry_after()
                        .unwrap_or_else(|| self.backoff_delay(attempt))
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        warn!(
                            provider = label,
                            error = %e,
                            attempts = attempt + 1,
                            "Retries exhausted on network error"
                        );
                        return Err(FetchError::Network(e.to_string()));
                    }

                    metrics::increment_provider_retries(label, "network");
                    debug!(provider = label, error = %e, "Network error, will retry");
                    self.backoff_delay(attempt)
                }
            };

            debug!(
                provider = label,
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// HTTP client shared by all holder sources, with the retry policy applied
/// to every request.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(policy: RetryPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, policy))
    }

    pub fn with_client(client: reqwest::Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` with `query` (percent-encoded) and `headers`. Non-retryable
    /// error statuses come back as `Ok(response)`; check the status before
    /// reading the body.
    pub async fn get(
        &self,
        provider: &str,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, FetchError> {
        self.policy
            .execute(provider, || {
                let mut request = self
                    .client
                    .get(url)
                    .query(query)
                    .header("accept", "application/json");
                for (name, value) in headers {
                    request = request.header(*name, *value);
                }
                request.send()
            })
            .await
    }
}
