//! Caller-side retry policy for transient fetch failures.
//!
//! The pipeline itself never retries. Boot and runtime reload paths wrap
//! their calls in a [`RetryPolicy`] so the bound and backoff stay a caller
//! decision.

use crate::error::FetchError;
use log::warn;
use std::time::Duration;

/// Bounded retry with exponential backoff, applied to transient errors only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(8))
    }
}

impl RetryPolicy {
    /// Create a policy making at most `attempts` calls in total.
    ///
    /// An `attempts` value of zero is treated as one.
    #[must_use]
    pub const fn new(attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that calls the operation exactly once.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Total number of calls the policy allows.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before retry number `retry` (1-based), doubling each time and
    /// capped at the maximum backoff.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use gateway_fetch::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(300));
    /// assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
    /// assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
    /// ```
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `operation`, retrying while it fails transiently and attempts
    /// remain. Blocks the calling thread between attempts.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient error, or the last transient error
    /// once attempts are exhausted.
    pub fn run<T>(&self, mut operation: impl FnMut() -> Result<T, FetchError>) -> Result<T, FetchError> {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        "fetch attempt {attempt}/{} failed: {err}; retrying in {delay:?}",
                        self.attempts
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::Cell;

    fn transient() -> FetchError {
        FetchError::Transient {
            key: "p1/model.zip".to_owned(),
            reason: "HTTP 503".to_owned(),
        }
    }

    fn permanent() -> FetchError {
        FetchError::Permanent {
            key: "p1/model.zip".to_owned(),
            reason: "object not found".to_owned(),
        }
    }

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO, Duration::ZERO)
    }

    #[rstest]
    fn transient_failures_are_retried_until_success() {
        let calls = Cell::new(0);
        let result = quick(3).run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(transient()) } else { Ok("installed") }
        });

        assert_eq!(result.expect("eventual success"), "installed");
        assert_eq!(calls.get(), 3);
    }

    #[rstest]
    fn attempts_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = quick(2).run(|| {
            calls.set(calls.get() + 1);
            Err(transient())
        });

        assert!(matches!(result, Err(FetchError::Transient { .. })));
        assert_eq!(calls.get(), 2);
    }

    #[rstest]
    fn permanent_failures_surface_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = quick(5).run(|| {
            calls.set(calls.get() + 1);
            Err(permanent())
        });

        assert!(matches!(result, Err(FetchError::Permanent { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[rstest]
    fn zero_attempts_still_calls_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).attempts(), 1);
        assert_eq!(RetryPolicy::once().attempts(), 1);
    }

    #[rstest]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(64, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.backoff_for(40), Duration::from_secs(30));
    }
}
