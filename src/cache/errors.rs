//! # Store Error Types
//!
//! Errors raised by the remote key-value backends and the layers built on them.
//! Every error carries a [`FailureClass`] so the failover policy can tell
//! infrastructure trouble apart from caller mistakes.

use thiserror::Error;

/// How a store failure is treated by the failover and restart policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Provider quota or request budget exhausted
    Quota,
    /// Network, connection or timeout trouble
    Network,
    /// Malformed request or unexpected backend reply; never triggers failover
    Logic,
}

/// Errors that can occur during store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Failed to reach the backend or the connection was dropped
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Operation exceeded its store-level timeout
    #[error("Store operation timed out: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Provider rejected the call because a quota was exhausted
    #[error("Store quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Failed to serialize or deserialize a stored value
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// The request itself was invalid (bad key, bad arguments)
    #[error("Invalid store request: {0}")]
    InvalidRequest(String),

    /// Backend answered with an error that is not an infrastructure failure
    #[error("Store backend error: {0}")]
    Backend(String),

    /// No healthy backend is available to serve the call
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Classify this error for failover decisions
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::QuotaExceeded(_) => FailureClass::Quota,
            Self::Connection(_) | Self::Timeout { .. } | Self::Unavailable(_) => {
                FailureClass::Network
            }
            Self::Serialization(_) | Self::InvalidRequest(_) | Self::Backend(_) => {
                FailureClass::Logic
            }
        }
    }

    /// Whether this error counts toward provider failover
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self.failure_class(), FailureClass::Logic)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::timeout("redis", 0)
        } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::timeout("http", 0)
        } else if err.is_connect() || err.is_request() {
            StoreError::Connection(err.to_string())
        } else if err.is_decode() {
            StoreError::Serialization(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert_eq!(
            StoreError::QuotaExceeded("daily limit".into()).failure_class(),
            FailureClass::Quota
        );
        assert_eq!(
            StoreError::timeout("get", 2000).failure_class(),
            FailureClass::Network
        );
        assert_eq!(
            StoreError::Connection("refused".into()).failure_class(),
            FailureClass::Network
        );
        assert_eq!(
            StoreError::InvalidRequest("empty key".into()).failure_class(),
            FailureClass::Logic
        );
        assert!(!StoreError::Backend("WRONGTYPE".into()).is_infrastructure());
        assert!(StoreError::Unavailable("no fallback".into()).is_infrastructure());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let store_err: StoreError = json_err.into();
        assert!(matches!(store_err, StoreError::Serialization(_)));
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::timeout("set", 1500);
        let display = format!("{err}");
        assert!(display.contains("timed out"));
        assert!(display.contains("set"));
        assert!(display.contains("1500ms"));
    }
}
