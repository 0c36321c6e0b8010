//! Retry with exponential backoff and jitter.
//!
//! Handles transient provider errors like rate limiting (429) and server
//! errors (500, 502, 503, 504). Non-retryable errors fail immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Errors that know whether a retry makes sense.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;

    /// Provider-supplied delay hint (e.g. Retry-After), if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// HTTP status codes worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomized to avoid thundering herds.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        // Deterministic-enough jitter without pulling in a RNG crate:
        // subsecond nanos of the current instant spread over [1-j, 1+j].
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0) as f64;
        let unit = nanos / 1_000_000_000.0;
        let factor = 1.0 + self.jitter * (2.0 * unit - 1.0);
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// Run `operation` until it succeeds, the error is non-retryable, or
/// attempts are exhausted. Returns the last error on failure.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    E: IsRetryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt + 1 >= config.max_attempts {
                    if attempt > 0 {
                        warn!("giving up after {} attempts: {}", attempt + 1, err);
                    }
                    return Err(err);
                }
                let delay = err
                    .retry_after()
                    .unwrap_or_else(|| config.delay_for_attempt(attempt));
                debug!(
                    "retryable error (attempt {}/{}), sleeping {:?}: {}",
                    attempt + 1,
                    config.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
