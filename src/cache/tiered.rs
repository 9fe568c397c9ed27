//! # Tiered Cache
//!
//! Read-through/write-through cache combining the in-process L1 tier with a
//! shared primary remote cache, plus an optional [`DualProviderStore`]
//! fallback used while the primary is unhealthy.
//!
//! ## Connection lifecycle
//!
//! `Connecting → Ready → Degraded → Restarting → Ready`. A heartbeat task pings
//! the primary on a fixed interval; reaching the ping failure threshold, or a
//! connection-ended signal, triggers a restart that recreates the client with
//! capped backoff (`min(attempt * base, cap)`). Only one restart runs at a
//! time; overlapping requests wait for the in-flight one and return.
//!
//! ## Routing
//!
//! | State | With fallback | Without fallback |
//! |---|---|---|
//! | Connecting / Ready | primary | primary |
//! | Degraded | fallback | primary |
//! | Restarting | fallback | reads miss, writes fail |

use super::backend::StoreBackend;
use super::dual::DualProviderStore;
use super::errors::{StoreError, StoreResult};
use super::local::LocalCache;
use super::traits::KvStore;
use crate::logging::{log_error, log_store_operation};
use crate::resilience::{
    restart_delay, ConnectionHealth, ConnectionState, PingVerdict, ShutdownSignal,
};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Recreates the primary backend during a restart
pub type BackendConnector =
    Arc<dyn Fn() -> BoxFuture<'static, StoreResult<StoreBackend>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredCacheSettings {
    pub l1_ttl: Duration,
    pub l1_max_entries: usize,
    /// Store-level timeout applied to every primary call
    pub operation_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub ping_failure_threshold: u32,
    pub restart_backoff_base: Duration,
    pub restart_backoff_cap: Duration,
}

impl Default for TieredCacheSettings {
    fn default() -> Self {
        Self {
            l1_ttl: Duration::from_secs(30),
            l1_max_entries: 10_000,
            operation_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            ping_failure_threshold: 3,
            restart_backoff_base: Duration::from_secs(1),
            restart_backoff_cap: Duration::from_secs(30),
        }
    }
}

/// Where a single call is sent
#[derive(Clone)]
enum Target {
    Primary(StoreBackend),
    Fallback(Arc<DualProviderStore>),
}

impl Target {
    fn is_primary(&self) -> bool {
        matches!(self, Self::Primary(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Primary(backend) => backend.provider_name(),
            Self::Fallback(store) => store.provider_name(),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self {
            Self::Primary(backend) => backend.get(key).await,
            Self::Fallback(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        match self {
            Self::Primary(backend) => backend.set(key, value, ttl).await,
            Self::Fallback(store) => store.set(key, value, ttl).await,
        }
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        match self {
            Self::Primary(backend) => backend.put_if_absent(key, value, ttl).await,
            Self::Fallback(store) => store.put_if_absent(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match self {
            Self::Primary(backend) => backend.delete(key).await,
            Self::Fallback(store) => store.delete(key).await,
        }
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        match self {
            Self::Primary(backend) => backend.keys(prefix).await,
            Self::Fallback(store) => store.keys(prefix).await,
        }
    }
}

pub struct TieredCache {
    l1: LocalCache,
    primary: RwLock<StoreBackend>,
    fallback: Option<Arc<DualProviderStore>>,
    connector: Option<BackendConnector>,
    health: ConnectionHealth,
    settings: TieredCacheSettings,
    restart_lock: tokio::sync::Mutex<()>,
    restart_generation: AtomicU64,
    restart_requested: Arc<Notify>,
    shutdown: Arc<ShutdownSignal>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("primary", &self.primary.read().provider_name())
            .field("state", &self.health.state())
            .field("has_fallback", &self.fallback.is_some())
            .field("l1_entries", &self.l1.len())
            .finish()
    }
}

impl TieredCache {
    pub fn new(primary: StoreBackend, settings: TieredCacheSettings) -> Self {
        Self {
            l1: LocalCache::new(settings.l1_ttl, settings.l1_max_entries),
            health: ConnectionHealth::new(
                format!("cache:{}", primary.provider_name()),
                settings.ping_failure_threshold,
            ),
            primary: RwLock::new(primary),
            fallback: None,
            connector: None,
            settings,
            restart_lock: tokio::sync::Mutex::new(()),
            restart_generation: AtomicU64::new(0),
            restart_requested: Arc::new(Notify::new()),
            shutdown: Arc::new(ShutdownSignal::new()),
            heartbeat_handle: Mutex::new(None),
        }
    }

    /// Route calls to `fallback` while the primary is unhealthy
    pub fn with_fallback(mut self, fallback: Arc<DualProviderStore>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Recreate the primary client through `connector` on restart
    ///
    /// Without a connector a restart re-pings the existing client.
    pub fn with_connector(mut self, connector: BackendConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.health.state()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn fallback(&self) -> Option<&Arc<DualProviderStore>> {
        self.fallback.as_ref()
    }

    pub fn settings(&self) -> &TieredCacheSettings {
        &self.settings
    }

    pub fn l1_len(&self) -> usize {
        self.l1.len()
    }

    /// Ping the primary once and record the result
    pub async fn verify_connection(&self) -> bool {
        self.heartbeat_tick().await.is_none() && self.health.is_ready()
    }

    // =========================================================================
    // Reads and writes
    // =========================================================================

    /// Read a value; infrastructure errors surface to the caller
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        if let Some(raw) = self.l1.get(key) {
            return Ok(Some(serde_json::from_str(&raw)?));
        }
        self.fetch_remote(key).await
    }

    /// Read a value, treating any failure as a miss
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(key = key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Read straight from the remote tier, skipping L1
    pub async fn get_uncached<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        self.fetch_remote(key).await
    }

    async fn fetch_remote<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let raw = self
            .dispatch("get", move |target| async move { target.get(key).await })
            .await?;
        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)?;
                self.l1.insert(key, raw, None);
                Ok(Some(value))
            }
            None => {
                self.l1.invalidate(key);
                Ok(None)
            }
        }
    }

    /// Write through both tiers; `ttl = None` keeps the remote value until deleted
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        let result = self
            .dispatch("set", |target| {
                let raw = raw.as_str();
                async move { target.set(key, raw, ttl).await }
            })
            .await;

        match result {
            Ok(()) => {
                self.l1.insert(key, raw, ttl);
                Ok(())
            }
            Err(e) => {
                self.l1.invalidate(key);
                Err(e)
            }
        }
    }

    /// Create-if-absent on the remote tier; returns `true` iff this call created it
    pub async fn put_if_absent<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let raw = serde_json::to_string(value)?;
        let created = self
            .dispatch("put_if_absent", |target| {
                let raw = raw.as_str();
                async move { target.put_if_absent(key, raw, ttl).await }
            })
            .await?;
        if !created {
            self.l1.invalidate(key);
        }
        Ok(created)
    }

    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        self.l1.invalidate(key);
        self.dispatch("delete", move |target| async move { target.delete(key).await })
            .await
    }

    /// Live remote keys starting with `prefix`
    pub async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.dispatch("keys", move |target| async move { target.keys(prefix).await })
            .await
    }

    fn current_primary(&self) -> StoreBackend {
        self.primary.read().clone()
    }

    fn route(&self) -> StoreResult<Target> {
        let state = self.health.state();
        match (state, &self.fallback) {
            (ConnectionState::Connecting | ConnectionState::Ready, _) => {
                Ok(Target::Primary(self.current_primary()))
            }
            (ConnectionState::Degraded | ConnectionState::Restarting, Some(fallback)) => {
                Ok(Target::Fallback(Arc::clone(fallback)))
            }
            (ConnectionState::Degraded, None) => Ok(Target::Primary(self.current_primary())),
            (ConnectionState::Restarting, None) => Err(StoreError::Unavailable(
                "primary cache is restarting and no fallback is configured".to_string(),
            )),
        }
    }

    async fn dispatch<T, F, Fut>(&self, operation: &'static str, op: F) -> StoreResult<T>
    where
        F: Fn(Target) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let target = self.route()?;
        if !target.is_primary() {
            return op(target).await;
        }

        let timeout = self.settings.operation_timeout;
        let error = match tokio::time::timeout(timeout, op(target)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_infrastructure() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => StoreError::timeout(operation, timeout.as_millis() as u64),
        };

        self.on_primary_failure(operation, &error);

        match &self.fallback {
            Some(fallback) => {
                let fallback = Target::Fallback(Arc::clone(fallback));
                debug!(
                    operation = operation,
                    provider = fallback.name(),
                    "Serving operation from fallback store"
                );
                op(fallback).await
            }
            None => Err(error),
        }
    }

    fn on_primary_failure(&self, operation: &str, error: &StoreError) {
        match error {
            StoreError::Connection(_) => {
                warn!(operation = operation, error = %error, "Primary cache connection lost");
                self.notify_connection_ended();
            }
            _ => {
                debug!(operation = operation, error = %error, "Primary cache call failed");
                self.health.mark_degraded();
            }
        }
    }

    // =========================================================================
    // Health monitoring and restart
    // =========================================================================

    /// Signal that the primary connection ended; the heartbeat task restarts it
    pub fn notify_connection_ended(&self) {
        if self.health.state() != ConnectionState::Restarting {
            self.health.mark_restarting();
            log_store_operation(
                "connection_ended",
                self.primary.read().provider_name(),
                "restarting",
                None,
            );
        }
        self.restart_requested.notify_one();
    }

    /// Ping the primary once
    ///
    /// Returns the failure verdict, or `None` when the ping succeeded or a
    /// restart is already pending.
    pub async fn heartbeat_tick(&self) -> Option<PingVerdict> {
        if self.health.state() == ConnectionState::Restarting {
            return None;
        }
        let backend = self.current_primary();
        let outcome = tokio::time::timeout(self.settings.operation_timeout, backend.health_check())
            .await;
        match outcome {
            Ok(Ok(true)) => {
                self.health.record_success();
                None
            }
            Ok(Ok(false)) => Some(self.health.record_ping_failure()),
            Ok(Err(e)) => {
                debug!(provider = backend.provider_name(), error = %e, "Cache ping failed");
                Some(self.health.record_ping_failure())
            }
            Err(_) => {
                debug!(provider = backend.provider_name(), "Cache ping timed out");
                Some(self.health.record_ping_failure())
            }
        }
    }

    /// Recreate the primary client, retrying with capped backoff until it answers
    ///
    /// Returns early if another restart completed while this call waited, and
    /// with `Unavailable` if shutdown interrupts the backoff.
    pub async fn restart(&self) -> StoreResult<()> {
        let observed = self.restart_generation.load(Ordering::Acquire);
        let _guard = self.restart_lock.lock().await;
        if self.restart_generation.load(Ordering::Acquire) != observed {
            debug!("Cache restart already completed by a concurrent request");
            return Ok(());
        }

        self.health.mark_restarting();
        let provider = self.primary.read().provider_name();
        log_store_operation("restart", provider, "started", None);

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.reconnect_once().await {
                Ok(backend) => {
                    *self.primary.write() = backend;
                    // Entries cached before the outage may be stale
                    self.l1.clear();
                    self.restart_generation.fetch_add(1, Ordering::AcqRel);
                    self.health.mark_restarted();
                    log_store_operation(
                        "restart",
                        provider,
                        "completed",
                        Some(&format!("after {attempt} attempt(s)")),
                    );
                    return Ok(());
                }
                Err(e) => {
                    let delay = restart_delay(
                        attempt,
                        self.settings.restart_backoff_base,
                        self.settings.restart_backoff_cap,
                    );
                    warn!(
                        provider = provider,
                        attempt = attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Cache restart attempt failed"
                    );
                    if !self.shutdown.sleep(delay).await {
                        return Err(StoreError::Unavailable(
                            "shutdown requested during cache restart".to_string(),
                        ));
                    }
                }
            }
        }
    }

    async fn reconnect_once(&self) -> StoreResult<StoreBackend> {
        let backend = match &self.connector {
            Some(connect) => connect().await?,
            None => self.current_primary(),
        };
        match tokio::time::timeout(self.settings.operation_timeout, backend.health_check()).await {
            Ok(Ok(true)) => Ok(backend),
            Ok(Ok(false)) => Err(StoreError::Connection(
                "fresh client failed its health check".to_string(),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StoreError::timeout(
                "restart_ping",
                self.settings.operation_timeout.as_millis() as u64,
            )),
        }
    }

    /// Spawn the heartbeat task; a second call while running is a no-op
    pub fn start_heartbeat(self: &Arc<Self>) {
        let mut handle = self.heartbeat_handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.shutdown.reset();

        let weak = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.shutdown);
        let restart_requested = Arc::clone(&self.restart_requested);
        let interval = self.settings.heartbeat_interval;

        *handle = Some(tokio::spawn(heartbeat_loop(
            weak,
            shutdown,
            restart_requested,
            interval,
        )));
        info!(
            interval_ms = interval.as_millis() as u64,
            "Cache heartbeat started"
        );
    }

    /// Stop the heartbeat task and wait for it to finish
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let handle = self.heartbeat_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log_error("tiered_cache", "stop", &e.to_string(), None);
            }
        }
        info!("Cache heartbeat stopped");
    }
}

async fn heartbeat_loop(
    cache: Weak<TieredCache>,
    shutdown: Arc<ShutdownSignal>,
    restart_requested: Arc<Notify>,
    interval: Duration,
) {
    loop {
        let restart = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = restart_requested.notified() => true,
            _ = tokio::time::sleep(interval) => {
                let Some(cache) = cache.upgrade() else { break };
                matches!(cache.heartbeat_tick().await, Some(PingVerdict::RestartRequired))
            }
        };

        if restart {
            let Some(cache) = cache.upgrade() else { break };
            if let Err(e) = cache.restart().await {
                debug!(error = %e, "Cache restart abandoned");
            }
        }
    }
    debug!("Cache heartbeat loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::dual::DualProviderSettings;
    use crate::cache::providers::MemoryKvStore;
    use futures::FutureExt;
    use serde_json::json;

    fn settings() -> TieredCacheSettings {
        TieredCacheSettings {
            heartbeat_interval: Duration::from_secs(10),
            restart_backoff_base: Duration::from_secs(1),
            restart_backoff_cap: Duration::from_secs(4),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_round_trip_json() {
        let primary = MemoryKvStore::new();
        let cache = TieredCache::new(primary.clone().into(), settings());
        let value = json!({"nested": {"n": 1.5, "flag": true, "list": [1, 2, 3]}});
        cache.set("k", &value, Some(Duration::from_secs(60))).await.unwrap();
        let read: serde_json::Value = cache.get("k").await.unwrap();
        assert_eq!(read, value);
    }

    #[tokio::test]
    async fn test_l1_serves_repeated_reads() {
        let primary = MemoryKvStore::new();
        let cache = TieredCache::new(primary.clone().into(), settings());
        cache.set("k", &1u32, None).await.unwrap();
        let calls = primary.calls();
        assert_eq!(cache.get::<u32>("k").await, Some(1));
        assert_eq!(cache.get::<u32>("k").await, Some(1));
        assert_eq!(primary.calls(), calls);
    }

    #[tokio::test]
    async fn test_no_fallback_read_misses_and_write_fails_when_restarting() {
        let primary = MemoryKvStore::new();
        let cache = TieredCache::new(primary.clone().into(), settings());
        cache.notify_connection_ended();
        assert_eq!(cache.state(), ConnectionState::Restarting);
        assert_eq!(cache.get::<u32>("missing").await, None);
        assert!(matches!(
            cache.set("k", &1u32, None).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_operation_failure_routes_to_fallback() {
        let primary = MemoryKvStore::new();
        let secondary = MemoryKvStore::new();
        let fallback = Arc::new(DualProviderStore::new(
            secondary.clone().into(),
            None,
            DualProviderSettings::default(),
        ));
        let cache = TieredCache::new(primary.clone().into(), settings()).with_fallback(fallback);
        assert!(cache.verify_connection().await);

        primary.fail_with(StoreError::timeout("get", 10));
        cache.set("k", &"v", None).await.unwrap();
        assert_eq!(cache.state(), ConnectionState::Degraded);
        assert_eq!(secondary.get("k").await.unwrap(), Some("\"v\"".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_restarts_collapse() {
        let primary = MemoryKvStore::new();
        let connects = Arc::new(AtomicU64::new(0));
        let connector: BackendConnector = {
            let primary = primary.clone();
            let connects = Arc::clone(&connects);
            Arc::new(move || {
                let primary = primary.clone();
                let connects = Arc::clone(&connects);
                async move {
                    connects.fetch_add(1, Ordering::AcqRel);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(StoreBackend::from(primary))
                }
                .boxed()
            })
        };
        let cache = TieredCache::new(primary.clone().into(), settings()).with_connector(connector);

        let (a, b) = tokio::join!(cache.restart(), cache.restart());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(connects.load(Ordering::Acquire), 1);
        assert_eq!(cache.state(), ConnectionState::Ready);
    }
}
