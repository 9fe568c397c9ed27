//! # Structured Logging Module
//!
//! Environment-aware structured logging for the coordination, cache and
//! status layers. Console output is either human-readable or JSON.

use crate::config::LoggingConfig;
use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = build_filter(config, &environment);

        let layer = if config.json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // An embedding application may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn build_filter(config: &LoggingConfig, environment: &str) -> EnvFilter {
    if let Some(level) = &config.level {
        return EnvFilter::new(level);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(get_log_level(environment)))
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("COURIER_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for coordination operations (locks, heartbeats, leadership)
pub fn log_coordination_operation(
    operation: &str,
    instance_id: &str,
    key: Option<&str>,
    outcome: &str,
) {
    tracing::info!(
        operation = %operation,
        instance_id = %instance_id,
        key = key,
        outcome = %outcome,
        timestamp = %Utc::now().to_rfc3339(),
        "🤝 COORDINATION_OPERATION"
    );
}

/// Log structured data for store provider operations (failover, restart)
pub fn log_store_operation(
    operation: &str,
    provider: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        provider = %provider,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 STORE_OPERATION"
    );
}

/// Log structured data for task status transitions
pub fn log_status_transition(task_id: &str, status: &str, tier: &str) {
    tracing::debug!(
        task_id = %task_id,
        status = %status,
        tier = %tier,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 STATUS_TRANSITION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_explicit_level_wins() {
        let config = LoggingConfig {
            level: Some("warn".to_string()),
            json: false,
        };
        let filter = build_filter(&config, "development");
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_structured_logging(&config);
        init_structured_logging(&config);
    }
}
