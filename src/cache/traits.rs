//! Key-value store trait definition

use super::errors::StoreResult;
use std::future::Future;
use std::time::Duration;

/// Capability set shared by every remote and in-process backend
///
/// Values are opaque strings (JSON produced by the layers above).
pub trait KvStore: Send + Sync {
    /// Returns `Ok(Some(value))` on hit, `Ok(None)` on miss or expiry.
    fn get(&self, key: &str) -> impl Future<Output = StoreResult<Option<String>>> + Send;

    /// Unconditional write; `ttl = None` keeps the value until deleted.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Create-if-absent write. Returns `true` iff this call created the key.
    fn put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = StoreResult<()>> + Send;

    /// All live keys starting with `prefix`
    fn keys(&self, prefix: &str) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    fn health_check(&self) -> impl Future<Output = StoreResult<bool>> + Send;

    fn provider_name(&self) -> &'static str;
}
