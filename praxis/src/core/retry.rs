//! Retry policy for transient failures.
//!
//! Transient errors (store timeouts, dropped connections) are retried by the
//! caller at the same tier. They are never escalated and never surfaced as
//! workflow failures until the policy is exhausted.

use std::future::Future;
use std::time::Duration;

/// Configuration for retrying transient failures.
///
/// # Examples
///
/// ```
/// use praxis::RetryPolicy;
/// use std::time::Duration;
///
/// const STORE_RETRY: RetryPolicy = RetryPolicy {
///     max_attempts: 5,
///     initial_delay: Duration::from_millis(50),
///     max_delay: Duration::from_secs(2),
///     backoff_multiplier: 2.0,
/// };
///
/// assert_eq!(STORE_RETRY.delay_for_attempt(1), Some(Duration::from_millis(50)));
/// assert_eq!(STORE_RETRY.delay_for_attempt(5), None);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first try.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Each retry delay is `initial_delay * backoff_multiplier^(attempt-1)`,
    /// capped at `max_delay`.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// No retries.
    pub const NONE: Self = Self {
        max_attempts: 1,
        initial_delay: Duration::from_secs(0),
        max_delay: Duration::from_secs(0),
        backoff_multiplier: 1.0,
    };

    /// Three attempts: immediate, then 1s, then 2s.
    pub const STANDARD: Self = Self {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    /// Ten attempts starting at 100ms, growing 1.5x up to 10s.
    pub const AGGRESSIVE: Self = Self {
        max_attempts: 10,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 1.5,
    };

    /// Create a policy with custom max_attempts and standard delays.
    pub const fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before retrying after `attempt` (1-indexed) failed, or `None`
    /// when no attempts remain.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1) as f64;
        let multiplier = self.backoff_multiplier.powf(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;

        Some(Duration::from_secs_f64(
            delay_secs.min(self.max_delay.as_secs_f64()),
        ))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<u32> for RetryPolicy {
    fn from(max_attempts: u32) -> Self {
        Self::with_max_attempts(max_attempts)
    }
}

/// Classifies an error as transient (worth retrying at the same tier) or permanent.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Executes `operation`, retrying transient errors according to `policy`.
///
/// The closure receives the current attempt number (1-indexed). Permanent
/// errors and exhausted policies return the last error unchanged.
pub async fn retry_transient<F, Fut, T, E>(policy: RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_transient() => {
                tracing::debug!("Operation failed with permanent error: {}", error);
                return Err(error);
            }
            Err(error) => match policy.delay_for_attempt(attempt) {
                Some(delay) => {
                    tracing::debug!(
                        "Transient failure (attempt {}/{}): {}. Retrying after {:?}",
                        attempt,
                        policy.max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    tracing::warn!(
                        "Transient failure exhausted retry attempts ({}/{}): {}",
                        attempt,
                        policy.max_attempts,
                        error
                    );
                    return Err(error);
                }
            },
        }
    }
}
