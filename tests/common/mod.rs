//! Shared helpers for integration tests

#![allow(dead_code)]

pub mod builders;
pub mod strategies;

pub use builders::*;

use courier_core::cache::{StoreError, TieredCacheSettings};
use std::time::Duration;

/// Short intervals so paused-time tests advance quickly
pub fn fast_cache_settings() -> TieredCacheSettings {
    TieredCacheSettings {
        l1_ttl: Duration::from_secs(5),
        operation_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::from_secs(10),
        ping_failure_threshold: 3,
        restart_backoff_base: Duration::from_secs(1),
        restart_backoff_cap: Duration::from_secs(4),
        ..Default::default()
    }
}

pub fn network_error() -> StoreError {
    StoreError::Connection("connection reset by peer".to_string())
}

pub fn quota_error() -> StoreError {
    StoreError::QuotaExceeded("daily write quota reached".to_string())
}

pub fn logic_error() -> StoreError {
    StoreError::InvalidRequest("key too long".to_string())
}

/// Let spawned tasks run up to their next await point
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
