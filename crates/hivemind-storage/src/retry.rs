//! Bounded retry with exponential backoff.
//!
//! Used when establishing a backend connection. Steady-state operations are
//! never retried here; a failed read or write surfaces to the caller once.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff policy for connection attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = a single attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub exponential_base: f64,
}

impl RetryConfig {
    /// Creates a new retry policy.
    #[must_use]
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            exponential_base: 2.0,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 2.0,
        }
    }

    /// The default policy for opening a database: three attempts in total,
    /// waiting 1s and then 2s between them.
    #[must_use]
    pub fn connect() -> Self {
        Self::new(2, Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Delay to wait before retry number `retry` (1-indexed). Zero for 0.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.exponential_base.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms.max(0.0) as u64)
    }

    /// Whether another retry is allowed after `retries_so_far` retries.
    #[must_use]
    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        retries_so_far < self.max_retries
    }

    /// The full delay schedule, one entry per retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_retries).map(|retry| self.delay_for_retry(retry))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::connect()
    }
}

/// Result of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded.
    Success(T),
    /// Every allowed attempt failed.
    Exhausted {
        /// Error from the final attempt.
        error: E,
        /// Total attempts made, including the first.
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Converts to a `Result`, dropping the attempt count.
    #[allow(clippy::missing_errors_doc)]
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Exhausted { error, .. } => Err(error),
        }
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or
/// the policy is exhausted. `operation` receives the 0-indexed attempt.
pub async fn retry<T, E, Fut, F, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut retries: u32 = 0;

    loop {
        match operation(retries).await {
            Ok(value) => return RetryOutcome::Success(value),
            Err(error) => {
                if !config.allows_retry(retries) || !should_retry(&error) {
                    return RetryOutcome::Exhausted {
                        error,
                        attempts: retries.saturating_add(1),
                    };
                }
                retries = retries.saturating_add(1);
                let delay = config.delay_for_retry(retries);
                tracing::debug!(retry = retries, delay_ms = delay.as_millis(), "Retrying after failure");
                tokio::time::sleep(delay).await;
            },
        }
    }
}
