//! Retry policy for remote calls.
//!
//! Only errors classified as transient ([`FetchError::is_retryable`]) are
//! retried. NotFound, PermissionDenied and Malformed fail on the first
//! attempt.
//!
//! # Example
//!
//! ```ignore
//! use geofeed::remote::{retry_with_policy, RetryPolicy};
//!
//! let policy = RetryPolicy::exponential(3);
//! let docs = retry_with_policy(&policy, || store.query_range(&query)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{FetchError, FetchResult};

/// First backoff delay, in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Upper bound on any single backoff delay, in seconds.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 5;

/// Growth factor between consecutive backoff delays.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How a remote call handles transient failures.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RetryPolicy {
    /// Single attempt.
    #[default]
    None,

    /// Constant pause between attempts.
    Fixed {
        /// Attempts in total, the first one included.
        max_attempts: u32,
        delay: Duration,
    },

    /// Exponential backoff, capped at `max_delay`.
    ExponentialBackoff {
        max_attempts: u32,
        /// Pause after the first failure.
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl RetryPolicy {
    /// Exponential backoff with default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Exponential backoff starting at `initial_delay`.
    pub fn exponential_from(max_attempts: u32, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS).max(initial_delay),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based), or
    /// `None` if no attempts remain.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let capped = delay_ms.min(max_delay.as_millis() as f64) as u64;
                Some(Duration::from_millis(capped).min(*max_delay))
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

/// Runs `op` until it succeeds, fails terminally, or the policy is spent.
pub async fn retry_with_policy<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> FetchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match policy.delay_for_attempt(attempt) {
                Some(delay) => {
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying remote call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::None;
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_for_attempt(1), None);
    }

    #[test]
    fn test_retry_policy_fixed() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_retry_policy_exponential() {
        let policy = RetryPolicy::ExponentialBackoff {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay_for_attempt(4), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay_for_attempt(5), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&RetryPolicy::exponential(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FetchError::transient("flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: FetchResult<()> = retry_with_policy(&RetryPolicy::exponential(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::transient("down")) }
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: FetchResult<()> = retry_with_policy(&RetryPolicy::exponential(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::permission_denied("no")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
