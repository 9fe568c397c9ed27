//! Dispatch error types

use std::time::Duration;
use thiserror::Error;

/// Errors that carry an upstream "retry after" hint
///
/// Returning `Some` marks the error as a rate-limit signal; the limiter sleeps
/// and retries instead of surfacing it.
pub trait RateLimitSignal {
    fn retry_after(&self) -> Option<Duration>;
}

/// Errors returned by limiter-wrapped calls
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// The call failed with a non rate-limit error
    #[error("Operation failed: {0}")]
    Operation(E),

    /// Still rate limited after every retry
    #[error("Rate limited after {attempts} attempts (last wait {retry_after:?}): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        retry_after: Duration,
        last_error: E,
    },

    /// The limiter was closed while the call waited
    #[error("Dispatch limiter is closed")]
    Closed,
}

impl<E> DispatchError<E> {
    /// The wrapped call's error, if there is one
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Operation(e) | Self::RetriesExhausted { last_error: e, .. } => Some(e),
            Self::Closed => None,
        }
    }
}
