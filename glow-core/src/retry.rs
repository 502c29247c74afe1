use std::fmt::Display;
use std::time::Duration;
use tracing::warn;

/// Errors that know whether trying again could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff: `initial_delay`, doubling per retry, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy for calls to the AI service: delays of 1s, 2s, 4s.
    pub const AI: RetryPolicy = RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(4),
    };

    /// Policy for persisting session events to the backend.
    pub const PERSISTENCE: RetryPolicy = RetryPolicy {
        max_retries: 5,
        initial_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(30),
    };

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Retry an async operation with exponential backoff.
///
/// Non-retryable errors are returned immediately. Returns the first success,
/// or the last error once retries are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: RetryPolicy, label: &str, f: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display + Retryable,
{
    let mut retry = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if retry >= policy.max_retries => {
                warn!("{} failed after {} attempts: {}", label, retry + 1, e);
                return Err(e);
            }
            Err(e) => {
                retry += 1;
                let delay = policy.delay_for(retry);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    retry,
                    policy.max_retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
