//! # Courier Configuration System
//!
//! Layered, validated configuration for every component of the core.
//!
//! ## Architecture
//!
//! - **Layered sources**: `courier.toml` → `courier.<env>.toml` → `COURIER_*` environment
//! - **Defaults everywhere**: every section deserializes with production defaults
//! - **Explicit validation**: inconsistent values are rejected at load time
//! - **Runtime settings**: each section converts into a `Duration`-based settings struct
//!   consumed by its component
//!
//! ## Usage
//!
//! ```rust,no_run
//! use courier_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let heartbeat = manager.config().instance.heartbeat_interval_seconds;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::{DualProviderSettings, TieredCacheSettings};
use crate::coordination::CoordinatorSettings;
use crate::dispatch::DispatchSettings;
use crate::status::StatusSettings;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring courier.toml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Instance identity, heartbeat and lock settings
    pub instance: InstanceConfig,

    /// Tiered cache (in-process + primary remote cache) settings
    pub cache: CacheConfig,

    /// Dual-provider durable key-value store settings
    pub store: StoreConfig,

    /// Relational store connection settings
    pub database: DatabaseConfig,

    /// Buffered status persistence settings
    pub status: StatusConfig,

    /// Outbound dispatch and rate-limit settings
    pub dispatch: DispatchConfig,

    /// Logging output settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Stable instance id; generated when absent
    pub id: Option<String>,
    pub hostname: Option<String>,
    pub region: String,
    pub heartbeat_interval_seconds: u64,
    /// Must be well above the heartbeat interval so slow ticks don't expire the record
    pub instance_ttl_seconds: u64,
    pub default_lock_ttl_seconds: u64,
    pub message_lock_ttl_seconds: u64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            id: None,
            hostname: None,
            region: "default".to_string(),
            heartbeat_interval_seconds: 300,
            instance_ttl_seconds: 900,
            default_lock_ttl_seconds: 300,
            message_lock_ttl_seconds: 600,
        }
    }
}

impl InstanceConfig {
    pub fn to_coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            region: self.region.clone(),
            hostname: self.hostname.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_seconds),
            instance_ttl: Duration::from_secs(self.instance_ttl_seconds),
            default_lock_ttl: Duration::from_secs(self.default_lock_ttl_seconds),
            message_lock_ttl: Duration::from_secs(self.message_lock_ttl_seconds),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1_ttl_seconds: u64,
    pub l1_max_entries: usize,
    pub operation_timeout_ms: u64,
    pub heartbeat_interval_seconds: u64,
    pub ping_failure_threshold: u32,
    pub restart_backoff_base_ms: u64,
    pub restart_backoff_cap_ms: u64,
    /// Primary remote cache; an in-process store is used when absent
    pub redis: Option<RedisConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_ttl_seconds: 30,
            l1_max_entries: 10_000,
            operation_timeout_ms: 2_000,
            heartbeat_interval_seconds: 30,
            ping_failure_threshold: 3,
            restart_backoff_base_ms: 1_000,
            restart_backoff_cap_ms: 30_000,
            redis: None,
        }
    }
}

impl CacheConfig {
    pub fn to_tiered_settings(&self) -> TieredCacheSettings {
        TieredCacheSettings {
            l1_ttl: Duration::from_secs(self.l1_ttl_seconds),
            l1_max_entries: self.l1_max_entries,
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_seconds),
            ping_failure_threshold: self.ping_failure_threshold,
            restart_backoff_base: Duration::from_millis(self.restart_backoff_base_ms),
            restart_backoff_cap: Duration::from_millis(self.restart_backoff_cap_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub failover_enabled: bool,
    pub failure_threshold: u32,
    /// Switch back to the primary provider once it answers again (off: manual only)
    pub auto_switch_back: bool,
    /// Quota-limited edge KV store, used as the primary provider
    pub edge: Option<EdgeKvConfig>,
    /// REST-accessible KV store, used as the secondary provider
    pub rest: Option<RestKvConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            failover_enabled: true,
            failure_threshold: 3,
            auto_switch_back: false,
            edge: None,
            rest: None,
        }
    }
}

impl StoreConfig {
    pub fn to_dual_settings(&self) -> DualProviderSettings {
        DualProviderSettings {
            failover_enabled: self.failover_enabled,
            failure_threshold: self.failure_threshold,
            auto_switch_back: self.auto_switch_back,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EdgeKvConfig {
    /// Namespace URL; `values/<key>` and `keys` are appended
    pub base_url: String,
    pub api_token: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestKvConfig {
    pub url: String,
    pub token: String,
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_http_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/courier_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    pub fast_ttl_seconds: u64,
    pub flush_interval_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub stale_after_seconds: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            fast_ttl_seconds: 300,
            flush_interval_seconds: 120,
            cleanup_interval_seconds: 300,
            stale_after_seconds: 1_800,
        }
    }
}

impl StatusConfig {
    pub fn to_status_settings(&self) -> StatusSettings {
        StatusSettings {
            fast_ttl: Duration::from_secs(self.fast_ttl_seconds),
            flush_interval: Duration::from_secs(self.flush_interval_seconds),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_seconds),
            stale_after: Duration::from_secs(self.stale_after_seconds),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    pub per_subject_concurrency: usize,
    pub max_retries: u32,
    pub max_jitter_ms: u64,
    pub cooldown_threshold_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            per_subject_concurrency: 1,
            max_retries: 3,
            max_jitter_ms: 500,
            cooldown_threshold_seconds: 60,
        }
    }
}

impl DispatchConfig {
    pub fn to_dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_concurrency: self.max_concurrency,
            per_subject_concurrency: self.per_subject_concurrency,
            max_retries: self.max_retries,
            max_jitter: Duration::from_millis(self.max_jitter_ms),
            cooldown_threshold: Duration::from_secs(self.cooldown_threshold_seconds),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit filter directive; falls back to RUST_LOG, then the environment default
    pub level: Option<String>,
    pub json: bool,
}

impl CourierConfig {
    /// Validate cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        let instance = &self.instance;
        if instance.heartbeat_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "instance.heartbeat_interval_seconds",
                "must be greater than 0",
            ));
        }
        if instance.instance_ttl_seconds <= instance.heartbeat_interval_seconds {
            return Err(ConfigurationError::invalid_value(
                "instance.instance_ttl_seconds",
                "must be greater than instance.heartbeat_interval_seconds",
            ));
        }
        if instance.default_lock_ttl_seconds == 0 || instance.message_lock_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "instance.*_lock_ttl_seconds",
                "lock TTLs must be greater than 0",
            ));
        }

        let cache = &self.cache;
        if cache.l1_ttl_seconds == 0 || cache.l1_ttl_seconds > 60 {
            return Err(ConfigurationError::invalid_value(
                "cache.l1_ttl_seconds",
                "must be between 1 and 60",
            ));
        }
        if cache.ping_failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.ping_failure_threshold",
                "must be greater than 0",
            ));
        }
        if cache.restart_backoff_base_ms > cache.restart_backoff_cap_ms {
            return Err(ConfigurationError::invalid_value(
                "cache.restart_backoff_base_ms",
                "must not exceed cache.restart_backoff_cap_ms",
            ));
        }
        if let Some(redis) = &cache.redis {
            if redis.url.trim().is_empty() {
                return Err(ConfigurationError::MissingRequired("cache.redis.url".into()));
            }
        }

        if self.store.failure_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "store.failure_threshold",
                "must be greater than 0",
            ));
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired("database.url".into()));
        }

        if self.status.stale_after_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "status.stale_after_seconds",
                "must be greater than 0",
            ));
        }

        let dispatch = &self.dispatch;
        if dispatch.max_concurrency == 0 || dispatch.per_subject_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatch.*_concurrency",
                "concurrency limits must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CourierConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.instance.heartbeat_interval_seconds, 300);
        assert_eq!(config.store.failure_threshold, 3);
        assert_eq!(config.dispatch.cooldown_threshold_seconds, 60);
    }

    #[test]
    fn test_instance_ttl_must_exceed_heartbeat() {
        let mut config = CourierConfig::default();
        config.instance.instance_ttl_seconds = config.instance.heartbeat_interval_seconds;
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("instance_ttl_seconds"));
    }

    #[test]
    fn test_backoff_base_must_not_exceed_cap() {
        let mut config = CourierConfig::default();
        config.cache.restart_backoff_base_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_conversion() {
        let config = CourierConfig::default();
        let tiered = config.cache.to_tiered_settings();
        assert_eq!(tiered.l1_ttl, Duration::from_secs(30));
        assert_eq!(tiered.restart_backoff_cap, Duration::from_secs(30));

        let status = config.status.to_status_settings();
        assert_eq!(status.stale_after, Duration::from_secs(1800));

        let dispatch = config.dispatch.to_dispatch_settings();
        assert_eq!(dispatch.cooldown_threshold, Duration::from_secs(60));
    }
}
