//! Bounded retry for operations whose result may not be available yet.
//!
//! An operation yields `Some(value)` once the value exists and `None` while
//! it does not. Errors that should stop the session are not the operation's
//! concern: exhausting the budget is reported as [`NotFoundError`] and the
//! caller decides that it is fatal.

use qrand_proto::NotFoundError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attempt budget and spacing for a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy. A zero attempt count is raised to one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Longest time the policy can spend sleeping.
    pub fn worst_case_wait(&self) -> Duration {
        self.delay * (self.max_attempts - 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

/// Runs `op` until it yields a value or the policy's attempts are used up.
///
/// `op` receives the 1-based attempt number. The delay is slept only between
/// attempts: a value on attempt N returns after exactly N calls, and the last
/// empty attempt returns the error without a trailing sleep.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, NotFoundError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = op(attempt).await {
            debug!(attempt, "Retry operation produced a value");
            return Ok(value);
        }

        if attempt < policy.max_attempts {
            debug!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = policy.delay.as_millis() as u64,
                "No value yet, retrying"
            );
            tokio::time::sleep(policy.delay).await;
        }
    }

    debug!(attempts = policy.max_attempts, "Retry budget exhausted");
    Err(NotFoundError {
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_value_on_nth_attempt_stops_there() {
        let policy = RetryPolicy::default();
        for n in 1..=policy.max_attempts() {
            let calls = Cell::new(0u32);
            let start = Instant::now();

            let result = with_retry(&policy, |attempt| {
                calls.set(calls.get() + 1);
                async move { (attempt == n).then_some(attempt * 10) }
            })
            .await;

            assert_eq!(result, Ok(n * 10));
            assert_eq!(calls.get(), n, "expected exactly {n} invocations");
            assert_eq!(start.elapsed(), policy.delay() * (n - 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_empty_exhausts_budget() {
        let policy = RetryPolicy::default();
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let result: Result<(), _> = with_retry(&policy, |_| {
            calls.set(calls.get() + 1);
            async { None }
        })
        .await;

        assert_eq!(result, Err(NotFoundError { attempts: 5 }));
        assert_eq!(calls.get(), 5);
        // Four gaps between five attempts, no trailing sleep
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_does_not_sleep() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let start = Instant::now();
        let result = with_retry(&policy, |_| async { Some("ctx") }).await;
        assert_eq!(result, Ok("ctx"));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_zero_attempts_raised_to_one() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.worst_case_wait(), Duration::ZERO);
    }

    #[test]
    fn test_default_worst_case_wait() {
        assert_eq!(RetryPolicy::default().worst_case_wait(), Duration::from_secs(8));
    }
}
