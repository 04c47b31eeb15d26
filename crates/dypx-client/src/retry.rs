//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Predicate deciding whether a failure is worth another attempt.
pub type RetryPredicate = fn(&Error) -> bool;

/// Retry policy applied around a backend call.
///
/// The delay after the `n`th failed attempt (zero-based) is
/// `multiplier * 2^n`, clamped to `[min_delay, max_delay]`. With the
/// defaults this gives 2s, 2s, 4s, 8s between five attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base multiplier of the exponential curve.
    pub multiplier: Duration,
    /// Floor for any single delay.
    pub min_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    retryable: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            retryable: Error::is_retryable,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt ceiling and default backoff curve.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Set the backoff curve.
    pub fn with_backoff(mut self, multiplier: Duration, min: Duration, max: Duration) -> Self {
        self.multiplier = multiplier;
        self.min_delay = min;
        self.max_delay = max.max(min);
        self
    }

    /// Replace the retryable-error predicate.
    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retryable = predicate;
        self
    }

    /// Whether `err` should consume another attempt.
    pub fn is_retryable(&self, err: &Error) -> bool {
        (self.retryable)(err)
    }

    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.multiplier.checked_mul(factor))
            .unwrap_or(self.max_delay);
        // max_delay wins when the bounds are inverted.
        raw.max(self.min_delay).min(self.max_delay)
    }

    /// Run `f` until it succeeds, fails permanently, or the attempt ceiling
    /// is reached. The last failure is returned unchanged.
    pub async fn run<F, Fut, T>(&self, label: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            attempt += 1;

            if !self.is_retryable(&err) {
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::error!(
                    call = label,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }

            let backoff = self.delay_for(attempt - 1);
            tracing::warn!(
                call = label,
                attempt = attempt,
                max_attempts = max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Request failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}
