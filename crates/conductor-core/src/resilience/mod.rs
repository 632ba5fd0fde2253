//! Resilience primitives for remote calls.
//!
//! - [`CircuitBreaker`] gates calls to one named target through
//!   CLOSED/OPEN/HALF_OPEN.
//! - [`CircuitBreakerRegistry`] hands out one breaker per name.
//! - [`RetryExecutor`] re-runs a call with a bounded backoff curve.
//!
//! Retry composes around a breaker: `retry.execute(|| breaker.call(op))`,
//! and the nested error collapses with [`ResilienceError::flatten`].

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStats,
    CircuitState,
};
pub use retry::{BackoffStrategy, RetryExecutor, RetryPolicy};

use crate::error::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the resilience wrappers around an operation failing with `E`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError<E> {
    /// The breaker rejected the call without running it.
    #[error("Circuit breaker '{name}' is open, retry after {:.1}s", retry_after.as_secs_f64())]
    CircuitOpen {
        /// Breaker name.
        name: String,
        /// Remaining time until the breaker admits a trial call.
        retry_after: Duration,
    },

    /// Every attempt failed with a retryable error.
    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: E,
    },

    /// The operation failed and the failure was passed through.
    #[error("{0}")]
    Inner(E),
}

impl<E> ResilienceError<E> {
    /// Returns the underlying operation error, if any.
    pub const fn inner(&self) -> Option<&E> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::MaxRetriesExceeded { last_error, .. } | Self::Inner(last_error) => {
                Some(last_error)
            }
        }
    }

    /// Returns true for a circuit-open rejection.
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl<E> ResilienceError<ResilienceError<E>> {
    /// Collapses the error of a retry wrapped around a breaker.
    ///
    /// A retry that exhausted its attempts keeps the outer attempt count.
    #[must_use]
    pub fn flatten(self) -> ResilienceError<E> {
        match self {
            Self::CircuitOpen { name, retry_after } => {
                ResilienceError::CircuitOpen { name, retry_after }
            }
            Self::Inner(inner) => inner,
            Self::MaxRetriesExceeded { attempts, last_error } => match last_error {
                ResilienceError::Inner(err)
                | ResilienceError::MaxRetriesExceeded { last_error: err, .. } => {
                    ResilienceError::MaxRetriesExceeded { attempts, last_error: err }
                }
                open @ ResilienceError::CircuitOpen { .. } => open,
            },
        }
    }
}

impl<E> ErrorCode for ResilienceError<E> {
    fn error_kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::MaxRetriesExceeded { .. } => "MaxRetriesExceeded",
            Self::Inner(_) => "OperationFailed",
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            Self::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
            Self::Inner(_) => "OPERATION_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Nested = ResilienceError<ResilienceError<String>>;

    #[test]
    fn test_flatten_inner_circuit_open() {
        let err: Nested = ResilienceError::Inner(ResilienceError::CircuitOpen {
            name: "agent".to_string(),
            retry_after: Duration::from_secs(5),
        });
        assert!(err.flatten().is_circuit_open());
    }

    #[test]
    fn test_flatten_exhausted_retries() {
        let err: Nested = ResilienceError::MaxRetriesExceeded {
            attempts: 3,
            last_error: ResilienceError::Inner("timeout".to_string()),
        };
        assert_eq!(
            err.flatten(),
            ResilienceError::MaxRetriesExceeded { attempts: 3, last_error: "timeout".to_string() }
        );
    }

    #[test]
    fn test_display_and_codes() {
        let err: ResilienceError<String> =
            ResilienceError::CircuitOpen { name: "a".to_string(), retry_after: Duration::from_millis(2500) };
        assert_eq!(err.to_string(), "Circuit breaker 'a' is open, retry after 2.5s");
        assert_eq!(err.error_code(), "CIRCUIT_BREAKER_OPEN");
        assert!(err.inner().is_none());

        let err: ResilienceError<String> = ResilienceError::Inner("boom".to_string());
        assert_eq!(err.inner().map(String::as_str), Some("boom"));
    }
}
