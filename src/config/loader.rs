//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate: base file, environment overlay file, then `COURIER_*`
//! environment variables (`__` separates nested sections, e.g.
//! `COURIER_CACHE__L1_TTL_SECONDS=10`).

use super::error::{ConfigResult, ConfigurationError};
use super::CourierConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "courier";

/// Loaded configuration together with the environment it was resolved for
#[derive(Debug)]
pub struct ConfigManager {
    config: CourierConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(None, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for tests that must not depend on process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::build_layers(&config_directory, environment)?;
        config.validate()?;

        let sanitized = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded: {}",
            serde_json::to_string(&sanitized).unwrap_or_else(|_| "[serialization error]".into())
        );
        info!(
            environment = environment,
            redis_configured = config.cache.redis.is_some(),
            edge_store_configured = config.store.edge.is_some(),
            rest_store_configured = config.store.rest.is_some(),
            "⚙️ Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (embedding and tests)
    pub fn from_config(
        config: CourierConfig,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with secrets masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect the runtime environment from environment variables
    pub fn detect_environment() -> String {
        env::var("COURIER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("COURIER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn build_layers(directory: &Path, environment: &str) -> ConfigResult<CourierConfig> {
        let base = directory.join(format!("{BASE_FILE_STEM}.toml"));
        let overlay = directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));

        let settings = config::Config::builder()
            .add_source(config::File::from(base.as_path()).required(false))
            .add_source(config::File::from(overlay.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::load_error(directory.display().to_string(), e.to_string())
            })?;

        settings
            .try_deserialize::<CourierConfig>()
            .map_err(|e| ConfigurationError::load_error(base.display().to_string(), e.to_string()))
    }

    fn sanitize_config_for_logging(config: &CourierConfig) -> serde_json::Value {
        let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        mask(&mut value, &["database", "url"]);
        mask(&mut value, &["cache", "redis", "url"]);
        mask(&mut value, &["store", "edge", "api_token"]);
        mask(&mut value, &["store", "rest", "token"]);
        value
    }
}

fn mask(value: &mut serde_json::Value, path: &[&str]) {
    let mut current = value;
    for segment in path {
        match current.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    if current.is_string() {
        *current = serde_json::Value::String("***REDACTED***".to_string());
    }
}
