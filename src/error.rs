//! Error types for the courier core.
//!

use crate::cache::StoreError;
use crate::config::ConfigurationError;
use crate::dispatch::RateLimitSignal;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CourierError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Coordination error: {0}")]
    CoordinationError(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl CourierError {
    /// Rate-limit signal carrying the upstream's suggested wait
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::RateLimited { retry_after }
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(error: serde_json::Error) -> Self {
        CourierError::SerializationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for CourierError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                CourierError::Timeout("database pool acquire timed out".to_string())
            }
            other => CourierError::DatabaseError(other.to_string()),
        }
    }
}

impl From<ConfigurationError> for CourierError {
    fn from(err: ConfigurationError) -> Self {
        CourierError::ConfigurationError(err.to_string())
    }
}

impl RateLimitSignal for CourierError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            CourierError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type CourierResult<T> = std::result::Result<T, CourierError>;
