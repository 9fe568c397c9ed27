//! # Status Repository
//!
//! Decides per transition whether task state is buffered in memory, written
//! to the fast cache tier, or written synchronously to the durable store.
//!
//! - **Buffered** (`queued`, `pending`): upsert into the pending map, no I/O
//! - **Fast** (`downloading`, `uploading`, `processing`): cache write with a
//!   bounded TTL; falls back to buffering if the cache write fails
//! - **Durable** (`completed`, `failed`, `cancelled`): synchronous durable
//!   write whose error reaches the caller, then the buffered and cached
//!   copies are dropped
//!
//! Buffered updates are last-write-wins on timestamp and drained by
//! [`StatusRepository::flush_updates`] in one batch.

use super::durable::{DurableStore, Statement};
use super::task_status::{TaskStatus, WriteTier};
use crate::cache::TieredCache;
use crate::error::CourierResult;
use crate::keys;
use crate::logging::{log_error, log_status_transition};
use crate::resilience::ShutdownSignal;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const STATUS_UPDATE_SQL: &str = "UPDATE tasks SET status = $1, updated_at = $2 WHERE id = $3";
/// Never moves a row backwards in time or out of a terminal status
const BUFFERED_STATUS_UPDATE_SQL: &str = "UPDATE tasks SET status = $1, updated_at = $2 \
     WHERE id = $3 AND (updated_at IS NULL OR updated_at <= $2) \
     AND status NOT IN ('completed', 'failed', 'cancelled')";
const STATUS_SELECT_SQL: &str = "SELECT status, updated_at FROM tasks WHERE id = $1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSettings {
    /// TTL of fast-tier cache entries
    pub fast_ttl: Duration,
    pub flush_interval: Duration,
    pub cleanup_interval: Duration,
    /// Buffered entries older than this are dropped unwritten
    pub stale_after: Duration,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            fast_ttl: Duration::from_secs(300),
            flush_interval: Duration::from_secs(120),
            cleanup_interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(1_800),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStatusUpdate {
    pub task_id: String,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
}

impl PendingStatusUpdate {
    fn statement(&self) -> Statement {
        status_update_statement(&self.task_id, self.status, self.timestamp)
    }

    fn flush_statement(&self) -> Statement {
        Statement::new(BUFFERED_STATUS_UPDATE_SQL)
            .bind(self.status.as_str())
            .bind(self.timestamp)
            .bind(self.task_id.as_str())
    }
}

/// Where an update ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    Buffered,
    FastWritten,
    /// Fast-tier write failed; held in the buffer instead
    BufferedAfterFastFailure,
    Durable,
    /// A newer buffered update for the task already exists
    IgnoredStale,
}

pub fn status_update_statement(
    task_id: &str,
    status: TaskStatus,
    at: DateTime<Utc>,
) -> Statement {
    Statement::new(STATUS_UPDATE_SQL)
        .bind(status.as_str())
        .bind(at)
        .bind(task_id)
}

pub struct StatusRepository {
    cache: Arc<TieredCache>,
    durable: Arc<dyn DurableStore>,
    pending: DashMap<String, PendingStatusUpdate>,
    /// Orders terminal writes against an in-flight flush batch
    durable_writes: tokio::sync::Mutex<()>,
    settings: StatusSettings,
    shutdown: Arc<ShutdownSignal>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for StatusRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusRepository")
            .field("pending", &self.pending.len())
            .field("durable", &self.durable)
            .field("settings", &self.settings)
            .finish()
    }
}

impl StatusRepository {
    pub fn new(
        cache: Arc<TieredCache>,
        durable: Arc<dyn DurableStore>,
        settings: StatusSettings,
    ) -> Self {
        Self {
            cache,
            durable,
            pending: DashMap::new(),
            durable_writes: tokio::sync::Mutex::new(()),
            settings,
            shutdown: Arc::new(ShutdownSignal::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_update(&self, task_id: &str) -> Option<PendingStatusUpdate> {
        self.pending.get(task_id).map(|entry| entry.value().clone())
    }

    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> CourierResult<StatusWrite> {
        self.update_status_at(task_id, status, Utc::now()).await
    }

    /// Apply a transition observed at `timestamp`
    pub async fn update_status_at(
        &self,
        task_id: &str,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    ) -> CourierResult<StatusWrite> {
        let update = PendingStatusUpdate {
            task_id: task_id.to_string(),
            status,
            timestamp,
        };

        let outcome = match status.write_tier() {
            WriteTier::Buffered => {
                if self.buffer(update) {
                    StatusWrite::Buffered
                } else {
                    StatusWrite::IgnoredStale
                }
            }
            WriteTier::Fast => self.write_fast(update).await,
            WriteTier::Durable => {
                self.write_durable(update).await?;
                StatusWrite::Durable
            }
        };

        log_status_transition(task_id, status.as_str(), &format!("{outcome:?}"));
        Ok(outcome)
    }

    /// Upsert into the pending map; `false` if a newer update is already held
    fn buffer(&self, update: PendingStatusUpdate) -> bool {
        match self.pending.entry(update.task_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().timestamp > update.timestamp {
                    return false;
                }
                occupied.insert(update);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(update);
                true
            }
        }
    }

    async fn write_fast(&self, update: PendingStatusUpdate) -> StatusWrite {
        let key = keys::task_status_key(&update.task_id);
        match self
            .cache
            .set(&key, &update, Some(self.settings.fast_ttl))
            .await
        {
            Ok(()) => {
                self.pending
                    .remove_if(&update.task_id, |_, held| held.timestamp <= update.timestamp);
                StatusWrite::FastWritten
            }
            Err(e) => {
                warn!(
                    task_id = %update.task_id,
                    status = %update.status,
                    error = %e,
                    "Fast status write failed, buffering instead"
                );
                if self.buffer(update) {
                    StatusWrite::BufferedAfterFastFailure
                } else {
                    StatusWrite::IgnoredStale
                }
            }
        }
    }

    async fn write_durable(&self, update: PendingStatusUpdate) -> CourierResult<()> {
        {
            let _ordered = self.durable_writes.lock().await;
            self.durable.run(update.statement()).await?;
            self.pending.remove(&update.task_id);
        }

        let key = keys::task_status_key(&update.task_id);
        if let Err(e) = self.cache.delete(&key).await {
            // The entry expires by TTL; the durable row is authoritative now
            debug!(task_id = %update.task_id, error = %e, "Could not delete cached status");
        }
        Ok(())
    }

    /// Latest known status: pending buffer, then fast cache, then durable store
    pub async fn get_status(&self, task_id: &str) -> CourierResult<Option<TaskStatus>> {
        if let Some(update) = self.pending_update(task_id) {
            return Ok(Some(update.status));
        }

        let key = keys::task_status_key(task_id);
        if let Some(update) = self.cache.get::<PendingStatusUpdate>(&key).await {
            return Ok(Some(update.status));
        }

        let row = self
            .durable
            .fetch_one(Statement::new(STATUS_SELECT_SQL).bind(task_id))
            .await?;
        row.and_then(|row| row.get("status").and_then(|v| v.as_text()).map(str::to_string))
            .map(|status| status.parse::<TaskStatus>())
            .transpose()
    }

    /// Write every buffered update in one batch
    ///
    /// The buffer is only cleared after the batch succeeds; entries replaced
    /// while the batch was in flight stay buffered for the next flush.
    pub async fn flush_updates(&self) -> CourierResult<usize> {
        let _ordered = self.durable_writes.lock().await;
        let snapshot: Vec<PendingStatusUpdate> =
            self.pending.iter().map(|entry| entry.value().clone()).collect();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let statements = snapshot
            .iter()
            .map(PendingStatusUpdate::flush_statement)
            .collect();
        if let Err(e) = self.durable.batch(statements).await {
            log_error(
                "status_repository",
                "flush_updates",
                &e.to_string(),
                Some(&format!("{} buffered updates kept", snapshot.len())),
            );
            return Err(e);
        }

        for flushed in &snapshot {
            self.pending.remove_if(&flushed.task_id, |_, held| held == flushed);
        }
        info!(
            flushed = snapshot.len(),
            remaining = self.pending.len(),
            "📤 Status updates flushed"
        );
        Ok(snapshot.len())
    }

    /// Drop buffered updates older than the staleness threshold without writing them
    pub fn cleanup_expired_updates(&self) -> usize {
        let stale_after = chrono::Duration::from_std(self.settings.stale_after)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        let cutoff = Utc::now() - stale_after;
        let before = self.pending.len();
        self.pending.retain(|_, update| update.timestamp >= cutoff);
        let removed = before.saturating_sub(self.pending.len());
        if removed > 0 {
            info!(removed = removed, "🧹 Stale buffered status updates dropped");
        }
        removed
    }

    // =========================================================================
    // Background loops
    // =========================================================================

    /// Spawn the flush and cleanup loops
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock();
        if handles.iter().any(|h| !h.is_finished()) {
            return;
        }
        handles.clear();
        self.shutdown.reset();

        handles.push(tokio::spawn(flush_loop(
            Arc::downgrade(self),
            Arc::clone(&self.shutdown),
            self.settings.flush_interval,
        )));
        handles.push(tokio::spawn(cleanup_loop(
            Arc::downgrade(self),
            Arc::clone(&self.shutdown),
            self.settings.cleanup_interval,
        )));
        info!(
            flush_interval_secs = self.settings.flush_interval.as_secs(),
            cleanup_interval_secs = self.settings.cleanup_interval.as_secs(),
            "Status repository loops started"
        );
    }

    /// Stop the loops and flush whatever is still buffered
    pub async fn shutdown(&self) -> CourierResult<usize> {
        self.shutdown.trigger();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                log_error("status_repository", "shutdown", &e.to_string(), None);
            }
        }
        self.flush_updates().await
    }
}

async fn flush_loop(
    repository: Weak<StatusRepository>,
    shutdown: Arc<ShutdownSignal>,
    interval: Duration,
) {
    while shutdown.sleep(interval).await {
        let Some(repository) = repository.upgrade() else {
            break;
        };
        // Failures keep the buffer intact for the next tick
        let _ = repository.flush_updates().await;
    }
    debug!("Status flush loop exited");
}

async fn cleanup_loop(
    repository: Weak<StatusRepository>,
    shutdown: Arc<ShutdownSignal>,
    interval: Duration,
) {
    while shutdown.sleep(interval).await {
        let Some(repository) = repository.upgrade() else {
            break;
        };
        repository.cleanup_expired_updates();
    }
    debug!("Status cleanup loop exited");
}
