//! # Cache Module
//!
//! Tiered, failover-aware key-value access shared by every component.
//!
//! ## Architecture
//!
//! - [`KvStore`]: capability set implemented by every backend
//! - [`StoreBackend`]: closed enum over the Redis, edge, REST and in-process
//!   backends (enum dispatch, no trait objects)
//! - [`DualProviderStore`]: primary/secondary remote stores with threshold failover
//! - [`TieredCache`]: L1 in-process tier + primary remote cache with health
//!   monitoring, restart and fallback to the dual-provider store
//!
//! Values cross the remote boundary as JSON strings; typed access lives on
//! [`TieredCache`].

pub mod backend;
pub mod dual;
pub mod errors;
pub mod local;
pub mod providers;
pub mod tiered;
pub mod traits;

pub use backend::{BackendRole, StoreBackend};
pub use dual::{DualProviderSettings, DualProviderStore, ProviderSlot, ProviderState};
pub use errors::{FailureClass, StoreError, StoreResult};
pub use local::LocalCache;
pub use providers::{EdgeKvStore, MemoryKvStore, RedisKvStore, RestKvStore};
pub use tiered::{BackendConnector, TieredCache, TieredCacheSettings};
pub use traits::KvStore;
