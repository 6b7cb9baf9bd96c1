//! Exponential backoff with jitter for transient failures.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::metrics::{MetricsSink, names};

/// Backoff parameters for retried operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay, jitter included.
    pub max_delay: Duration,
    /// Total attempts, first one included.
    pub max_attempts: u32,
    /// Jitter as a fraction of the current delay, drawn uniformly from `[0, ratio]`.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter.
    ///
    /// `initial * 2^(attempt-1)`, capped at `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay with jitter for a given unit sample in `[0, 1]`.
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = base.mul_f64(self.jitter_ratio.max(0.0) * unit.clamp(0.0, 1.0));
        (base + jitter).min(self.max_delay)
    }

    /// Delay with random jitter after failed attempt `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, rand::random::<f64>())
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget runs out.
///
/// The closure receives the 1-based attempt number. When transient failures
/// exhaust the budget the last one is wrapped in [`AppError::RetriesExhausted`].
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    metrics: &dyn MetricsSink,
    operation_name: &str,
    mut operation: F,
) -> Result<T, AppError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        metrics.increment(names::FETCH_ATTEMPTS, 1);
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                metrics.increment(names::FETCH_RETRIES, 1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "Giving up after transient failures"
                );
                return Err(AppError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }
}
