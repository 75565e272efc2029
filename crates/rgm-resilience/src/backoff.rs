//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use crate::ResilienceError;

/// Configuration for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Retry `op` until it succeeds or `config.max_attempts` is exhausted,
/// sleeping with exponential backoff and +/-20% jitter between attempts.
///
/// Used for per-group distributed lock acquisition and config-store reads,
/// both classified as transient failures that should be retried before
/// being surfaced.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: RetryConfig,
    mut op: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(source) => {
                if attempt >= config.max_attempts {
                    return Err(ResilienceError::RetriesExhausted { attempts: attempt, source });
                }
                tracing::warn!(attempt, max = config.max_attempts, "retrying after transient error");
                let jitter = 0.8 + fastrand::f64() * 0.4;
                let sleep_for = delay.mul_f64(jitter).min(config.max_delay);
                tokio::time::sleep(sleep_for).await;
                delay = (delay.mul_f64(config.multiplier)).min(config.max_delay);
            }
        }
    }
}
