//! Builders for in-process test topologies

use super::fast_cache_settings;
use courier_core::cache::{
    DualProviderSettings, DualProviderStore, MemoryKvStore, StoreBackend, TieredCache,
    TieredCacheSettings,
};
use courier_core::coordination::{CoordinatorSettings, InstanceCoordinator};
use courier_core::status::{RecordingDurableStore, StatusRepository, StatusSettings};
use std::sync::Arc;

/// Primary and secondary memory stores behind a dual-provider store
pub struct DualFixture {
    pub primary: MemoryKvStore,
    pub secondary: MemoryKvStore,
    pub store: Arc<DualProviderStore>,
}

pub fn dual_fixture(settings: DualProviderSettings) -> DualFixture {
    let primary = MemoryKvStore::new();
    let secondary = MemoryKvStore::new();
    let store = Arc::new(DualProviderStore::new(
        StoreBackend::from(primary.clone()),
        Some(StoreBackend::from(secondary.clone())),
        settings,
    ));
    DualFixture {
        primary,
        secondary,
        store,
    }
}

/// Tiered cache over a memory primary, optionally with a dual-provider fallback
pub struct CacheFixture {
    pub primary: MemoryKvStore,
    pub fallback: Option<DualFixture>,
    pub cache: Arc<TieredCache>,
}

pub struct CacheFixtureBuilder {
    settings: TieredCacheSettings,
    with_fallback: bool,
}

impl CacheFixtureBuilder {
    pub fn new() -> Self {
        Self {
            settings: fast_cache_settings(),
            with_fallback: false,
        }
    }

    pub fn with_settings(mut self, settings: TieredCacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.with_fallback = true;
        self
    }

    pub fn build(self) -> CacheFixture {
        let primary = MemoryKvStore::new();
        let mut cache = TieredCache::new(StoreBackend::from(primary.clone()), self.settings);
        let fallback = self
            .with_fallback
            .then(|| dual_fixture(DualProviderSettings::default()));
        if let Some(fixture) = &fallback {
            cache = cache.with_fallback(Arc::clone(&fixture.store));
        }
        CacheFixture {
            primary,
            fallback,
            cache: Arc::new(cache),
        }
    }
}

impl Default for CacheFixtureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn coordinator(id: &str, cache: &Arc<TieredCache>) -> Arc<InstanceCoordinator> {
    Arc::new(InstanceCoordinator::new(
        Some(id.to_string()),
        Arc::clone(cache),
        CoordinatorSettings {
            hostname: Some(format!("{id}.local")),
            ..Default::default()
        },
    ))
}

pub fn status_repository(
    cache: &Arc<TieredCache>,
) -> (Arc<StatusRepository>, Arc<RecordingDurableStore>) {
    let durable = Arc::new(RecordingDurableStore::new());
    let repository = Arc::new(StatusRepository::new(
        Arc::clone(cache),
        durable.clone(),
        StatusSettings::default(),
    ));
    (repository, durable)
}
