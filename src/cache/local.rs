//! In-process L1 tier
//!
//! Short-TTL moka cache in front of the remote tier. Entries are never served
//! past their local expiry, which bounds staleness after another instance
//! writes the same key remotely.

use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    ttl: Duration,
}

/// Per-entry expiry: `min(remote ttl, local ttl)`, reset on overwrite
struct EntryTtl;

impl Expiry<String, LocalEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

pub struct LocalCache {
    entries: Cache<String, LocalEntry>,
    ttl: Duration,
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("max_capacity", &self.entries.policy().max_capacity())
            .field("entry_count", &self.entries.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl LocalCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries.max(1) as u64)
            .expire_after(EntryTtl)
            .build();
        Self { entries, ttl }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value)
    }

    /// Cache `value` for `min(ttl, local ttl)`
    pub fn insert(&self, key: &str, value: String, ttl: Option<Duration>) {
        let ttl = ttl.map_or(self.ttl, |ttl| ttl.min(self.ttl));
        if ttl.is_zero() {
            self.entries.invalidate(key);
            return;
        }
        self.entries.insert(key.to_string(), LocalEntry { value, ttl });
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.invalidate(key);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Live entry count after pending evictions are applied
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_entries_expire_at_local_ttl() {
        let cache = LocalCache::new(Duration::from_millis(100), 100);
        cache.insert("k", "v".into(), Some(Duration::from_secs(3600)));
        assert_eq!(cache.get("k"), Some("v".to_string()));
        sleep(Duration::from_millis(200));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_shorter_remote_ttl_wins() {
        let cache = LocalCache::new(Duration::from_secs(30), 100);
        cache.insert("k", "v".into(), Some(Duration::from_millis(50)));
        sleep(Duration::from_millis(150));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let cache = LocalCache::new(Duration::from_secs(30), 100);
        cache.insert("k", "1".into(), None);
        cache.insert("k", "2".into(), None);
        assert_eq!(cache.get("k"), Some("2".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = LocalCache::new(Duration::from_secs(30), 8);
        for i in 0..64 {
            cache.insert(&format!("k{i}"), i.to_string(), None);
        }
        assert!(cache.len() <= 8);
    }

    #[test]
    fn test_zero_ttl_is_not_cached() {
        let cache = LocalCache::new(Duration::from_secs(30), 10);
        cache.insert("k", "v".into(), Some(Duration::ZERO));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = LocalCache::new(Duration::from_secs(30), 10);
        cache.insert("a", "1".into(), None);
        cache.insert("b", "2".into(), None);
        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }
}
