//! In-process key-value store
//!
//! Shared-nothing store used when no remote cache is configured, and by tests.
//! Clones share the same data, so a "reconnected" client sees earlier writes.
//! Supports fault injection to simulate outages of a remote backend.

use crate::cache::errors::{StoreError, StoreResult};
use crate::cache::traits::KvStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() >= expires_at)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
struct Fault {
    error: StoreError,
    /// `None` fails until `recover` is called
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: DashMap<String, MemoryEntry>,
    fault: Mutex<Option<Fault>>,
    /// Reads of these keys fail until `recover`
    read_faults: DashMap<String, StoreError>,
    calls: AtomicU64,
}

/// DashMap-backed store with TTLs and injectable failures
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<MemoryInner>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with `error` until `recover` is called
    pub fn fail_with(&self, error: StoreError) {
        *self.inner.fault.lock() = Some(Fault {
            error,
            remaining: None,
        });
    }

    /// Fail the next `times` calls with `error`
    pub fn fail_times(&self, times: u32, error: StoreError) {
        if times == 0 {
            return;
        }
        *self.inner.fault.lock() = Some(Fault {
            error,
            remaining: Some(times),
        });
    }

    /// Fail every `get` of `key` with `error` until `recover` is called
    pub fn fail_reads_of(&self, key: &str, error: StoreError) {
        self.inner.read_faults.insert(key.to_string(), error);
    }

    pub fn recover(&self) {
        *self.inner.fault.lock() = None;
        self.inner.read_faults.clear();
    }

    /// Number of calls received, including failed ones
    pub fn calls(&self) -> u64 {
        self.inner.calls.load(Ordering::Acquire)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_fault(&self) -> StoreResult<()> {
        self.inner.calls.fetch_add(1, Ordering::AcqRel);
        let mut fault = self.inner.fault.lock();
        let (error, exhausted) = match fault.as_mut() {
            None => return Ok(()),
            Some(active) => {
                let exhausted = match active.remaining.as_mut() {
                    Some(remaining) => {
                        *remaining = remaining.saturating_sub(1);
                        *remaining == 0
                    }
                    None => false,
                };
                (active.error.clone(), exhausted)
            }
        };
        if exhausted {
            *fault = None;
        }
        Err(error)
    }
}

impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_fault()?;
        if let Some(error) = self.inner.read_faults.get(key) {
            return Err(error.value().clone());
        }
        let expired = match self.inner.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.inner.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_fault()?;
        self.inner
            .entries
            .insert(key.to_string(), MemoryEntry::new(value, ttl));
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_fault()?;
        match self.inner.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(MemoryEntry::new(value, Some(ttl)));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(value, Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_fault()?;
        self.inner.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_fault()?;
        Ok(self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.is_expired())
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn health_check(&self) -> StoreResult<bool> {
        self.check_fault()?;
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
