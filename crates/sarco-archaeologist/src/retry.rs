//! Bounded exponential backoff for external calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ArchaeologistError;

/// Retry policy for transient collaborator failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay after the first failure
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    pub max_backoff: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// The last error seen once a policy gave up.
#[derive(Debug)]
pub struct GaveUp {
    pub attempts: u32,
    pub error: ArchaeologistError,
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, GaveUp>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ArchaeologistError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(GaveUp {
                        attempts: attempt,
                        error,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(60), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = RetryPolicy::default()
            .run("fetch", move || async move {
                let calls = counter;
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ArchaeologistError::Storage("unavailable".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), GaveUp> = RetryPolicy::default()
            .run("submit", move || async move {
                let calls = counter;
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ArchaeologistError::Submission("reverted".into()))
            })
            .await;

        let gave_up = result.unwrap_err();
        assert_eq!(gave_up.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), GaveUp> = RetryPolicy::default()
            .run("decrypt", move || async move {
                let calls = counter;
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ArchaeologistError::Decrypt("bad key".into()))
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
