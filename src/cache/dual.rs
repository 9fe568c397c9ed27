//! # Dual-Provider Store
//!
//! Key-value access over two independent remote backends with automatic
//! failover from the primary provider to the secondary one.
//!
//! ## Failover policy
//!
//! - Quota and network/timeout failures increment `failure_count`
//! - Logic failures (bad request, unexpected reply) are returned untouched
//! - When the count reaches the threshold, the store switches to the secondary
//!   provider, resets the count to 0 and retries the triggering call once
//! - A successful call does not reset the count; only a switch does
//! - There is no automatic switch-back unless `auto_switch_back` is set;
//!   [`DualProviderStore::probe_primary`] and [`DualProviderStore::switch_to`]
//!   are the recovery hooks

use super::backend::StoreBackend;
use super::errors::{StoreError, StoreResult};
use super::providers::{EdgeKvStore, RestKvStore};
use super::traits::KvStore;
use crate::config::StoreConfig;
use crate::logging::log_store_operation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Failover tuning for [`DualProviderStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualProviderSettings {
    pub failover_enabled: bool,
    /// Consecutive infrastructure failures before switching providers
    pub failure_threshold: u32,
    /// Let [`DualProviderStore::check_recovery`] switch back to the primary
    pub auto_switch_back: bool,
}

impl Default for DualProviderSettings {
    fn default() -> Self {
        Self {
            failover_enabled: true,
            failure_threshold: 3,
            auto_switch_back: false,
        }
    }
}

/// Which of the two providers serves calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSlot {
    Primary,
    Secondary,
}

impl std::fmt::Display for ProviderSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Snapshot of the provider selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderState {
    pub current_provider: ProviderSlot,
    pub failure_count: u32,
    pub failover_enabled: bool,
}

#[derive(Debug)]
struct Selection {
    current: ProviderSlot,
    failure_count: u32,
}

#[derive(Debug)]
pub struct DualProviderStore {
    primary: StoreBackend,
    secondary: Option<StoreBackend>,
    settings: DualProviderSettings,
    selection: Mutex<Selection>,
}

impl DualProviderStore {
    pub fn new(
        primary: StoreBackend,
        secondary: Option<StoreBackend>,
        settings: DualProviderSettings,
    ) -> Self {
        info!(
            primary = primary.provider_name(),
            secondary = secondary.as_ref().map(|s| s.provider_name()),
            failover_enabled = settings.failover_enabled,
            failure_threshold = settings.failure_threshold,
            "Dual-provider store initialized"
        );
        Self {
            primary,
            secondary,
            settings,
            selection: Mutex::new(Selection {
                current: ProviderSlot::Primary,
                failure_count: 0,
            }),
        }
    }

    /// Build from configuration: edge store as primary, REST store as secondary
    ///
    /// With only one provider configured it becomes the primary and failover is
    /// impossible. Returns `Ok(None)` when neither is configured.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Option<Self>> {
        let edge = config
            .edge
            .as_ref()
            .map(EdgeKvStore::from_config)
            .transpose()?
            .map(StoreBackend::from);
        let rest = config
            .rest
            .as_ref()
            .map(RestKvStore::from_config)
            .transpose()?
            .map(StoreBackend::from);

        let settings = config.to_dual_settings();
        Ok(match (edge, rest) {
            (Some(edge), rest) => Some(Self::new(edge, rest, settings)),
            (None, Some(rest)) => Some(Self::new(rest, None, settings)),
            (None, None) => None,
        })
    }

    pub fn state(&self) -> ProviderState {
        let selection = self.selection.lock();
        ProviderState {
            current_provider: selection.current,
            failure_count: selection.failure_count,
            failover_enabled: self.settings.failover_enabled,
        }
    }

    pub fn current_provider(&self) -> ProviderSlot {
        self.selection.lock().current
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Manually select a provider; always resets the failure count
    pub fn switch_to(&self, slot: ProviderSlot) -> StoreResult<()> {
        if slot == ProviderSlot::Secondary && self.secondary.is_none() {
            return Err(StoreError::InvalidRequest(
                "No secondary provider configured".to_string(),
            ));
        }
        let previous = {
            let mut selection = self.selection.lock();
            let previous = selection.current;
            selection.current = slot;
            selection.failure_count = 0;
            previous
        };
        if previous != slot {
            log_store_operation(
                "manual_switch",
                self.backend_for(slot).provider_name(),
                "switched",
                Some(&format!("{previous} -> {slot}")),
            );
        }
        Ok(())
    }

    /// Whether the primary provider answers a health check right now
    pub async fn probe_primary(&self) -> bool {
        match self.primary.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                debug!(
                    provider = self.primary.provider_name(),
                    error = %e,
                    "Primary provider probe failed"
                );
                false
            }
        }
    }

    /// Switch back to the primary if it recovered and switch-back is enabled
    ///
    /// Returns `true` when a switch happened.
    pub async fn check_recovery(&self) -> bool {
        if !self.settings.auto_switch_back || self.current_provider() == ProviderSlot::Primary {
            return false;
        }
        if !self.probe_primary().await {
            return false;
        }
        // Primary is always configured, so this cannot fail
        self.switch_to(ProviderSlot::Primary).is_ok()
    }

    fn backend_for(&self, slot: ProviderSlot) -> &StoreBackend {
        match (slot, &self.secondary) {
            (ProviderSlot::Secondary, Some(secondary)) => secondary,
            _ => &self.primary,
        }
    }

    /// Count an infrastructure failure observed on `slot`
    ///
    /// Returns the provider to retry on when the call should be retried.
    fn record_failure(&self, slot: ProviderSlot, error: &StoreError) -> Option<ProviderSlot> {
        let mut selection = self.selection.lock();

        // Another call already switched away from the failing provider
        if selection.current != slot {
            return Some(selection.current);
        }

        selection.failure_count = selection.failure_count.saturating_add(1);
        let failures = selection.failure_count;

        let can_switch = self.settings.failover_enabled
            && self.secondary.is_some()
            && selection.current == ProviderSlot::Primary;

        if failures >= self.settings.failure_threshold && can_switch {
            selection.current = ProviderSlot::Secondary;
            selection.failure_count = 0;
            drop(selection);

            warn!(
                from = self.primary.provider_name(),
                to = self.backend_for(ProviderSlot::Secondary).provider_name(),
                failures = failures,
                error = %error,
                "🔀 Provider failover triggered"
            );
            log_store_operation(
                "failover",
                self.backend_for(ProviderSlot::Secondary).provider_name(),
                "switched",
                Some(&format!("{failures} consecutive failures: {error}")),
            );
            return Some(ProviderSlot::Secondary);
        }

        debug!(
            provider = self.backend_for(slot).provider_name(),
            failures = failures,
            threshold = self.settings.failure_threshold,
            class = ?error.failure_class(),
            "Provider failure recorded"
        );
        None
    }

    async fn execute<'s, T, F, Fut>(&'s self, operation: &str, op: F) -> StoreResult<T>
    where
        F: Fn(&'s StoreBackend) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let slot = self.current_provider();
        let error = match op(self.backend_for(slot)).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_infrastructure() => return Err(e),
            Err(e) => e,
        };

        match self.record_failure(slot, &error) {
            Some(retry_slot) => {
                debug!(
                    operation = operation,
                    provider = self.backend_for(retry_slot).provider_name(),
                    "Retrying operation on the active provider"
                );
                op(self.backend_for(retry_slot)).await
            }
            None => Err(error),
        }
    }
}

impl KvStore for DualProviderStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.execute("get", |backend| backend.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.execute("set", |backend| backend.set(key, value, ttl))
            .await
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.execute("put_if_absent", |backend| {
            backend.put_if_absent(key, value, ttl)
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.execute("delete", |backend| backend.delete(key)).await
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.execute("keys", |backend| backend.keys(prefix)).await
    }

    async fn health_check(&self) -> StoreResult<bool> {
        self.backend_for(self.current_provider()).health_check().await
    }

    fn provider_name(&self) -> &'static str {
        self.backend_for(self.current_provider()).provider_name()
    }
}
