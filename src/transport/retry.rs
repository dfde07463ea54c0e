//! Retry logic with exponential backoff

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio::time::sleep;
use tracing::debug;

use crate::Error;
use crate::config::HttpConfig;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Delay before the second attempt; doubled for each one after
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            max_delay: config.max_retry_delay,
        }
    }

    /// Attempt budget for a call
    #[must_use]
    pub fn max_attempts(&self, idempotent: bool) -> u32 {
        if idempotent {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Create the backoff schedule. Non-idempotent calls get an empty one.
    #[must_use]
    pub fn create_backoff(&self, idempotent: bool) -> ExponentialBuilder {
        let retries = self.max_attempts(idempotent) - 1;
        ExponentialBuilder::default()
            .with_factor(2.0)
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(usize::try_from(retries).unwrap_or(usize::MAX))
    }

    /// A server-provided delay wins over the computed one, up to `max_delay`
    #[must_use]
    pub fn delay(&self, computed: Duration, retry_after: Option<Duration>) -> Duration {
        retry_after.map_or(computed, |d| d.min(self.max_delay))
    }
}

/// A failed attempt plus the server's requested delay, if any
#[derive(Debug)]
pub struct AttemptError {
    /// The failure
    pub error: Error,
    /// Parsed `Retry-After`
    pub retry_after: Option<Duration>,
}

impl From<Error> for AttemptError {
    fn from(error: Error) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

/// Execute a future with retry logic
///
/// `f` receives the 0-based attempt index. Only idempotent calls whose
/// failure is retryable are attempted again.
///
/// # Errors
///
/// Returns the last error from `f` if all retry attempts are exhausted or
/// the error is not retryable.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    idempotent: bool,
    name: &str,
    mut f: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut attempt = 0u32;
    let run = move || {
        let current = attempt;
        attempt = attempt.saturating_add(1);
        f(current)
    };

    let result = run
        .retry(policy.create_backoff(idempotent))
        .sleep(sleep)
        .when(|e: &AttemptError| idempotent && e.error.is_retryable())
        .adjust(|e: &AttemptError, next: Option<Duration>| {
            next.map(|computed| policy.delay(computed, e.retry_after))
        })
        .notify(|e: &AttemptError, delay: Duration| {
            debug!(
                operation = name,
                delay_ms = delay.as_millis(),
                error = %e.error,
                "Retrying after backoff"
            );
        })
        .await;

    result.map_err(|e| e.error)
}
