//! Bounded retry with exponential backoff for completion calls.
//!
//! Transient failures (5xx, rate limits, timeouts, garbled answers) are
//! common under concurrent load. Each attempt runs under its own timeout;
//! the delay before retry `n` is `initial_backoff * 2^(n-1)`, capped at
//! `max_backoff`. With the defaults (500 ms, 3 retries) the waits are
//! 500 ms, 1 s, 2 s.
//!
//! Permanent failures ([`ServiceError::is_retryable`] is false) end the run
//! immediately.

use crate::error::ServiceError;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Limit on each individual attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently or runs out of retries.
    ///
    /// `op` receives the 1-based attempt number. On success returns the
    /// value and the number of attempts used.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), ServiceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let max_attempts = self.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                let backoff = self.backoff_for(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label,
                    attempt - 1,
                    self.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            let started = Instant::now();
            let result = match timeout(self.attempt_timeout, op(attempt)).await {
                Ok(r) => r,
                Err(_) => Err(ServiceError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(ServiceError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
                Err(e) => warn!("{}: attempt {} failed: {}", label, attempt, e),
            }
        }
    }
}
