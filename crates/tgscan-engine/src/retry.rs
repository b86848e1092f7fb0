//! Retry with exponential back-off and jitter for remote calls.
//!
//! [`retry_with_backoff`] wraps a fallible remote operation. Transport
//! failures back off exponentially from the policy's base delay; a
//! flood-control signal is handed to the shared [`RateLimiter`] so every
//! caller waits it out, not just this one. Everything else is returned
//! immediately.

use std::future::Future;
use std::time::Duration;

use tgscan_core::ScannerConfig;

use crate::error::ScanError;
use crate::rate_limit::RateLimiter;

const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl From<&ScannerConfig> for RetryPolicy {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::try_from_secs_f64(config.default_delay_secs.max(0.0))
                .unwrap_or(MAX_DELAY),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), before jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << (attempt - 1).min(10))
            .min(MAX_DELAY)
    }
}

/// Runs `operation` with up to `policy.max_retries` additional attempts.
///
/// | Error                    | Handling                                          |
/// |--------------------------|---------------------------------------------------|
/// | `TransientNetwork`       | sleep `base * 2^(n-1)` ± 25 % jitter, capped 60 s |
/// | `FloodWait { seconds }`  | global limiter block, then one budget unit        |
/// | anything else            | returned as-is                                    |
///
/// # Errors
///
/// Returns the last error once retries are exhausted, any non-retriable
/// error, or [`ScanError::RateLimitExceeded`] if a flood block is longer
/// than the limiter allows.
pub async fn retry_with_backoff<T, E, F, Fut>(
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ScanError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ScanError>,
{
    let mut attempt = 0u32;
    loop {
        let err: ScanError = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err.into(),
        };

        // The block applies to every caller, even when this one gives up.
        let flooded = if let ScanError::FloodWait { seconds } = &err {
            limiter.on_flood_wait(*seconds);
            true
        } else {
            false
        };

        if !err.is_retriable() || attempt >= policy.max_retries {
            return Err(err);
        }
        attempt += 1;

        if flooded {
            limiter.acquire(1).await?;
            continue;
        }

        let capped = policy.backoff(attempt);
        let delay = capped.mul_f64(rand::random::<f64>() * 0.5 + 0.75);
        tracing::warn!(
            operation = operation_name,
            attempt,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient remote error; retrying after back-off"
        );
        tokio::time::sleep(delay).await;
    }
}
