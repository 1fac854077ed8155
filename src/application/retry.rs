//! Bounded retry for venue calls
//!
//! Every exchange call made by the controller and monitor goes through
//! [`RetryPolicy::run`]: a fixed number of attempts with a fixed pause between
//! them. Exhaustion is reported as [`RetryError::AdapterUnavailable`], never as a
//! zero or empty value, so callers cannot mistake a dead venue for an empty account.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::ports::ExchangeError;

/// Default number of attempts per call
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryError {
    #[error("{operation} unavailable after {attempts} attempts: {last_error}")]
    AdapterUnavailable {
        operation: &'static str,
        attempts: u32,
        last_error: ExchangeError,
    },
    #[error("{operation} failed: {error}")]
    Rejected {
        operation: &'static str,
        error: ExchangeError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only transient errors are retried; a rejection is returned immediately.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExchangeError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}/{}", operation, attempt, attempts);
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_transient() => {
                    tracing::error!("{} failed permanently: {}", operation, error);
                    return Err(RetryError::Rejected { operation, error });
                }
                Err(error) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation,
                        attempt,
                        attempts,
                        error
                    );
                    last_error = Some(error);
                    if attempt < attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        Err(RetryError::AdapterUnavailable {
            operation,
            attempts,
            last_error: last_error
                .unwrap_or_else(|| ExchangeError::Unavailable("no attempt made".into())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ExchangeAdapter, ScriptedExchange};
    use rust_decimal_macros::dec;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let venue = ScriptedExchange::default().with_balance("USDT", dec!(100));
        venue.fail_next("get_available_balance", 2, ExchangeError::Network("reset".into()));
        let policy = RetryPolicy::default();

        let started = Instant::now();
        let balance = policy
            .run("get_available_balance", || venue.get_available_balance("USDT"))
            .await
            .unwrap();

        assert_eq!(balance, dec!(100));
        assert_eq!(venue.call_count("get_available_balance"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_distinct_from_zero() {
        let venue = ScriptedExchange::default();
        venue.fail_next("get_available_balance", 3, ExchangeError::RateLimited);

        let result = RetryPolicy::default()
            .run("get_available_balance", || venue.get_available_balance("USDT"))
            .await;

        assert_eq!(
            result,
            Err(RetryError::AdapterUnavailable {
                operation: "get_available_balance",
                attempts: 3,
                last_error: ExchangeError::RateLimited,
            })
        );
        assert_eq!(venue.call_count("get_available_balance"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let venue = ScriptedExchange::default();
        venue.fail_next("get_increment_rules", 1, ExchangeError::UnknownSymbol("FOO-BAR".into()));
        let symbol = crate::ports::Symbol::new("FOO", "BAR");

        let started = Instant::now();
        let result = RetryPolicy::default()
            .run("get_increment_rules", || venue.get_increment_rules(&symbol))
            .await;

        assert!(matches!(result, Err(RetryError::Rejected { .. })));
        assert_eq!(venue.call_count("get_increment_rules"), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_policy_has_at_least_one_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 3);
        assert_eq!(RetryPolicy::default().delay, Duration::from_secs(5));
    }
}
