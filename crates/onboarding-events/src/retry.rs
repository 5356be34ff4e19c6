//! Bounded retry with backoff.
//!
//! Retries are always explicit: callers wrap an operation in
//! [`RetryPolicy::execute`] and say which errors are worth another attempt.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never zero.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the wait after every failed attempt.
    pub multiplier: f64,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Doubling backoff starting at `base`.
    #[must_use]
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: base,
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Same wait between every attempt.
    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// One attempt, no retry.
    #[must_use]
    pub fn single() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Default for publish and store retries: 3 attempts, 1s doubling.
    #[must_use]
    pub fn standard() -> Self {
        Self::exponential(3, Duration::from_secs(1))
    }

    /// Wait after the given failed attempt (1-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or attempts run out. Returns the last error.
    pub async fn execute<F, Fut, T, E>(
        &self,
        mut operation: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts || !is_retryable(&e) {
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
