//! Closed set of key-value backends
//!
//! Uses enum dispatch instead of trait objects: the backend set is fixed and
//! `KvStore` returns `impl Future`, which is not object-safe anyway.

use super::errors::StoreResult;
use super::providers::{EdgeKvStore, MemoryKvStore, RedisKvStore, RestKvStore};
use super::traits::KvStore;
use std::time::Duration;

/// Role a backend plays in the store topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendRole {
    /// Fast remote cache behind the in-process tier
    PrimaryCache,
    /// Quota-limited edge key-value store
    SecondaryStore,
    /// REST-accessible alternative key-value store
    TertiaryStore,
    /// In-process store (single instance deployments and tests)
    Local,
}

#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// Redis primary cache (boxed to reduce enum size)
    Redis(Box<RedisKvStore>),
    /// Edge key-value store
    Edge(Box<EdgeKvStore>),
    /// REST key-value store
    Rest(Box<RestKvStore>),
    /// In-process store
    Memory(MemoryKvStore),
}

impl StoreBackend {
    pub fn role(&self) -> BackendRole {
        match self {
            Self::Redis(_) => BackendRole::PrimaryCache,
            Self::Edge(_) => BackendRole::SecondaryStore,
            Self::Rest(_) => BackendRole::TertiaryStore,
            Self::Memory(_) => BackendRole::Local,
        }
    }

    pub fn is_distributed(&self) -> bool {
        !matches!(self, Self::Memory(_))
    }
}

impl KvStore for StoreBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self {
            Self::Redis(s) => s.get(key).await,
            Self::Edge(s) => s.get(key).await,
            Self::Rest(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        match self {
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::Edge(s) => s.set(key, value, ttl).await,
            Self::Rest(s) => s.set(key, value, ttl).await,
            Self::Memory(s) => s.set(key, value, ttl).await,
        }
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        match self {
            Self::Redis(s) => s.put_if_absent(key, value, ttl).await,
            Self::Edge(s) => s.put_if_absent(key, value, ttl).await,
            Self::Rest(s) => s.put_if_absent(key, value, ttl).await,
            Self::Memory(s) => s.put_if_absent(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match self {
            Self::Redis(s) => s.delete(key).await,
            Self::Edge(s) => s.delete(key).await,
            Self::Rest(s) => s.delete(key).await,
            Self::Memory(s) => s.delete(key).await,
        }
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        match self {
            Self::Redis(s) => s.keys(prefix).await,
            Self::Edge(s) => s.keys(prefix).await,
            Self::Rest(s) => s.keys(prefix).await,
            Self::Memory(s) => s.keys(prefix).await,
        }
    }

    async fn health_check(&self) -> StoreResult<bool> {
        match self {
            Self::Redis(s) => s.health_check().await,
            Self::Edge(s) => s.health_check().await,
            Self::Rest(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::Redis(s) => s.provider_name(),
            Self::Edge(s) => s.provider_name(),
            Self::Rest(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
        }
    }
}

impl From<MemoryKvStore> for StoreBackend {
    fn from(store: MemoryKvStore) -> Self {
        Self::Memory(store)
    }
}

impl From<RedisKvStore> for StoreBackend {
    fn from(store: RedisKvStore) -> Self {
        Self::Redis(Box::new(store))
    }
}

impl From<EdgeKvStore> for StoreBackend {
    fn from(store: EdgeKvStore) -> Self {
        Self::Edge(Box::new(store))
    }
}

impl From<RestKvStore> for StoreBackend {
    fn from(store: RestKvStore) -> Self {
        Self::Rest(Box::new(store))
    }
}
