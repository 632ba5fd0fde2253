//! Bounded retry with configurable backoff.

use super::ResilienceError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tracing::{debug, warn};

/// Shape of the delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Always `base_delay`.
    Constant,
    /// `base_delay * (attempt + 1)`, capped.
    Linear,
    /// `base_delay * 2^attempt`, capped.
    #[default]
    Exponential,
    /// Exponential plus up to 10% random jitter.
    ExponentialJitter,
}

/// Retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay curve.
    pub strategy: BackoffStrategy,
    /// Delay unit.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay after the failed attempt numbered `attempt` (0-based).
    ///
    /// # Arguments
    /// * `attempt` - Index of the attempt that just failed
    ///
    /// # Returns
    /// The sleep before the next attempt
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = match self.strategy {
            BackoffStrategy::Constant => self.base_delay,
            BackoffStrategy::Linear => self
                .base_delay
                .checked_mul(attempt.saturating_add(1))
                .map_or(self.max_delay, |d| d.min(self.max_delay)),
            BackoffStrategy::Exponential | BackoffStrategy::ExponentialJitter => 2u32
                .checked_pow(attempt)
                .and_then(|factor| self.base_delay.checked_mul(factor))
                .map_or(self.max_delay, |d| d.min(self.max_delay)),
        };

        if self.strategy == BackoffStrategy::ExponentialJitter {
            let jitter: f64 = rand::thread_rng().gen_range(0.0..=0.1);
            return capped + capped.mul_f64(jitter);
        }
        capped
    }
}

type RetryPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type RetryCallback<E> = Box<dyn Fn(&E, u32) + Send + Sync>;

/// Runs an operation up to `max_attempts` times.
///
/// Errors rejected by the retry predicate are returned immediately as
/// `ResilienceError::Inner`. The `on_retry` callback runs before each sleep
/// with the error and the number of the upcoming attempt; a panicking
/// callback is logged and ignored.
pub struct RetryExecutor<E> {
    name: String,
    policy: RetryPolicy,
    retryable: RetryPredicate<E>,
    on_retry: Option<RetryCallback<E>>,
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: fmt::Display> RetryExecutor<E> {
    /// Creates an executor that retries every error.
    #[must_use]
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self { name: name.into(), policy, retryable: Box::new(|_| true), on_retry: None }
    }

    /// Restricts retries to errors matching `predicate`.
    #[must_use]
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Box::new(predicate);
        self
    }

    /// Registers a callback invoked before each backoff sleep.
    #[must_use]
    pub fn on_retry(mut self, callback: impl Fn(&E, u32) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Box::new(callback));
        self
    }

    /// Returns the policy in use.
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `operation` with retries.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::Inner` for a non-retryable error and
    /// `ResilienceError::MaxRetriesExceeded` once every attempt failed.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retry = %self.name, attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !(self.retryable)(&err) {
                debug!(retry = %self.name, error = %err, "Non-retryable error, giving up");
                return Err(ResilienceError::Inner(err));
            }

            if attempt + 1 >= max_attempts {
                warn!(retry = %self.name, attempts = max_attempts, error = %err, "All retry attempts failed");
                return Err(ResilienceError::MaxRetriesExceeded { attempts: max_attempts, last_error: err });
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                retry = %self.name,
                attempt = attempt + 1,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Attempt failed, retrying"
            );
            self.notify(&err, attempt + 1);

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn notify(&self, err: &E, attempt: u32) {
        if let Some(callback) = &self.on_retry
            && catch_unwind(AssertUnwindSafe(|| callback(err, attempt))).is_err()
        {
            warn!(retry = %self.name, attempt, "on_retry callback panicked, continuing");
        }
    }
}
