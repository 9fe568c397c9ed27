//! # Process Context
//!
//! One explicit handle owning every shared component of a process: the tiered
//! cache and its fallback store, the durable store, the instance coordinator,
//! the status repository, the dispatch limiter and the settings store.
//!
//! Components are wired once in [`CourierContext::from_config`] and passed to
//! callers by reference; nothing is held in process-global state.

use crate::cache::{
    BackendConnector, DualProviderStore, MemoryKvStore, RedisKvStore, StoreBackend, TieredCache,
};
use crate::config::ConfigManager;
use crate::coordination::InstanceCoordinator;
use crate::dispatch::DispatchLimiter;
use crate::error::CourierResult;
use crate::logging::log_error;
use crate::settings::SettingsStore;
use crate::status::{DurableStore, PgDurableStore, StatusRepository};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshot for health endpoints and diagnostics
#[derive(Debug, Clone)]
pub struct ContextStatus {
    pub running: bool,
    pub environment: String,
    pub instance_id: String,
    pub is_leader: bool,
    pub cache_state: crate::resilience::ConnectionState,
    pub fallback_provider: Option<crate::cache::ProviderSlot>,
    pub pending_status_updates: usize,
    pub dispatch: crate::dispatch::DispatchStats,
}

pub struct CourierContext {
    config_manager: Arc<ConfigManager>,
    cache: Arc<TieredCache>,
    durable: Arc<dyn DurableStore>,
    coordinator: Arc<InstanceCoordinator>,
    status: Arc<StatusRepository>,
    dispatch: Arc<DispatchLimiter>,
    settings: SettingsStore,
    running: AtomicBool,
}

impl std::fmt::Debug for CourierContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierContext")
            .field("environment", &self.config_manager.environment())
            .field("instance_id", &self.coordinator.instance_id())
            .field("cache", &self.cache)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl CourierContext {
    /// Build every component from configuration
    ///
    /// Connects to the primary cache when one is configured; the relational
    /// pool is created lazily. Background tasks are not started.
    pub async fn from_config(config_manager: Arc<ConfigManager>) -> CourierResult<Self> {
        info!(
            environment = config_manager.environment(),
            "🚀 BOOTSTRAP: Building courier context"
        );
        let config = config_manager.config();

        let fallback = DualProviderStore::from_config(&config.store)?.map(Arc::new);
        if let Some(store) = &fallback {
            info!(
                has_secondary = store.has_secondary(),
                "✅ BOOTSTRAP: Fallback store configured"
            );
        }

        let tiered_settings = config.cache.to_tiered_settings();
        let mut cache = match &config.cache.redis {
            Some(redis_config) => {
                let primary = RedisKvStore::connect(redis_config).await?;
                let redis_config = redis_config.clone();
                let connector: BackendConnector = Arc::new(move || {
                    let redis_config = redis_config.clone();
                    async move {
                        RedisKvStore::connect(&redis_config)
                            .await
                            .map(StoreBackend::from)
                    }
                    .boxed()
                });
                TieredCache::new(StoreBackend::from(primary), tiered_settings)
                    .with_connector(connector)
            }
            None => {
                warn!("No primary cache configured, using in-process store");
                TieredCache::new(StoreBackend::from(MemoryKvStore::new()), tiered_settings)
            }
        };
        if let Some(store) = fallback {
            cache = cache.with_fallback(store);
        }
        let cache = Arc::new(cache);

        let durable: Arc<dyn DurableStore> =
            Arc::new(PgDurableStore::connect_lazy(&config.database)?);

        let context = Self::from_components(config_manager, cache, durable);
        info!(
            instance_id = context.coordinator.instance_id(),
            "🎉 BOOTSTRAP: Courier context ready"
        );
        Ok(context)
    }

    /// Wire the remaining components around an existing cache and durable store
    pub fn from_components(
        config_manager: Arc<ConfigManager>,
        cache: Arc<TieredCache>,
        durable: Arc<dyn DurableStore>,
    ) -> Self {
        let config = config_manager.config();
        let coordinator = Arc::new(InstanceCoordinator::new(
            config.instance.id.clone(),
            Arc::clone(&cache),
            config.instance.to_coordinator_settings(),
        ));
        let status = Arc::new(StatusRepository::new(
            Arc::clone(&cache),
            Arc::clone(&durable),
            config.status.to_status_settings(),
        ));
        let dispatch = Arc::new(DispatchLimiter::new(config.dispatch.to_dispatch_settings()));
        let settings = SettingsStore::new(Arc::clone(&cache));

        Self {
            config_manager,
            cache,
            durable,
            coordinator,
            status,
            dispatch,
            settings,
            running: AtomicBool::new(false),
        }
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    pub fn coordinator(&self) -> &Arc<InstanceCoordinator> {
        &self.coordinator
    }

    pub fn status(&self) -> &Arc<StatusRepository> {
        &self.status
    }

    pub fn dispatch(&self) -> &Arc<DispatchLimiter> {
        &self.dispatch
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the cache heartbeat, instance registration and status loops
    pub async fn start(&self) -> CourierResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Courier context already running");
            return Ok(());
        }
        self.cache.start_heartbeat();
        if let Err(e) = self.coordinator.start().await {
            self.running.store(false, Ordering::Release);
            self.cache.stop().await;
            return Err(e);
        }
        self.status.start();
        info!(
            instance_id = self.coordinator.instance_id(),
            "✅ Courier context started"
        );
        Ok(())
    }

    /// Stop every background task, flushing buffered status updates first
    ///
    /// Every component is stopped even if the final flush fails; the flush
    /// error is returned afterwards.
    pub async fn shutdown(&self) -> CourierResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Courier context already stopped");
            return Ok(());
        }
        info!("🛑 Courier context shutting down");

        self.dispatch.close();
        let flushed = self.status.shutdown().await;
        if let Err(e) = &flushed {
            log_error("context", "shutdown", &e.to_string(), Some("final status flush"));
        }
        self.coordinator.stop().await;
        self.cache.stop().await;

        info!("✅ Courier context stopped");
        flushed.map(|_| ())
    }

    pub async fn status_snapshot(&self) -> ContextStatus {
        ContextStatus {
            running: self.is_running(),
            environment: self.config_manager.environment().to_string(),
            instance_id: self.coordinator.instance_id().to_string(),
            is_leader: self.coordinator.is_leader_cached(),
            cache_state: self.cache.state(),
            fallback_provider: self.cache.fallback().map(|store| store.current_provider()),
            pending_status_updates: self.status.pending_count(),
            dispatch: self.dispatch.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CourierConfig;
    use crate::status::{RecordingDurableStore, TaskStatus};

    fn config_manager() -> Arc<ConfigManager> {
        let mut config = CourierConfig::default();
        config.instance.id = Some("ctx-test".to_string());
        ConfigManager::from_config(config, "test").unwrap()
    }

    #[tokio::test]
    async fn test_from_config_without_remote_stores() {
        let context = CourierContext::from_config(config_manager()).await.unwrap();
        assert_eq!(context.coordinator().instance_id(), "ctx-test");
        assert!(!context.cache().has_fallback());
        assert!(!context.is_running());
    }

    #[tokio::test]
    async fn test_start_and_shutdown_flushes_buffer() {
        let cache = Arc::new(TieredCache::new(
            StoreBackend::from(MemoryKvStore::new()),
            Default::default(),
        ));
        let recorder = Arc::new(RecordingDurableStore::new());
        let context =
            CourierContext::from_components(config_manager(), cache, recorder.clone());

        context.start().await.unwrap();
        assert!(context.is_running());
        assert_eq!(context.coordinator().get_instance_count().await.unwrap(), 1);

        context
            .status()
            .update_status("task-1", TaskStatus::Queued)
            .await
            .unwrap();
        assert_eq!(context.status_snapshot().await.pending_status_updates, 1);

        context.shutdown().await.unwrap();
        assert!(!context.is_running());
        assert_eq!(recorder.batches().len(), 1);
        assert!(context.dispatch().is_closed());
        assert_eq!(context.coordinator().get_instance_count().await.unwrap(), 0);
    }
}
