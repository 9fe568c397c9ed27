//! # Instance Coordinator
//!
//! Registers this process as an instance, keeps its record alive with a
//! heartbeat loop, answers advisory leadership queries and grants short-lived
//! distributed locks.
//!
//! Every remote call fails safe: lock acquisition fails closed, heartbeat
//! errors are logged and retried on the next tick, and leadership queries
//! answer "not leader" when the store cannot be read.

use super::instance::{elect_leader, local_hostname, InstanceRecord};
use crate::cache::TieredCache;
use crate::error::CourierResult;
use crate::keys::{self, GENERIC_LOCK_SCOPE, INSTANCE_PREFIX, TASK_LOCK_SCOPE};
use crate::logging::{log_coordination_operation, log_error};
use crate::resilience::ShutdownSignal;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub region: String,
    pub hostname: Option<String>,
    pub heartbeat_interval: Duration,
    /// Must stay well above `heartbeat_interval`
    pub instance_ttl: Duration,
    pub default_lock_ttl: Duration,
    pub message_lock_ttl: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            region: "default".to_string(),
            hostname: None,
            heartbeat_interval: Duration::from_secs(300),
            instance_ttl: Duration::from_secs(900),
            default_lock_ttl: Duration::from_secs(300),
            message_lock_ttl: Duration::from_secs(600),
        }
    }
}

/// Result of one heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Record found and written back with a fresh heartbeat
    Refreshed,
    /// Record was missing and has been registered again
    Reregistered,
    /// Store error; retried on the next tick
    Skipped,
}

pub struct InstanceCoordinator {
    instance_id: String,
    hostname: String,
    cache: Arc<TieredCache>,
    settings: CoordinatorSettings,
    leader: AtomicBool,
    shutdown: Arc<ShutdownSignal>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InstanceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCoordinator")
            .field("instance_id", &self.instance_id)
            .field("hostname", &self.hostname)
            .field("region", &self.settings.region)
            .field("leader", &self.leader.load(Ordering::Acquire))
            .finish()
    }
}

impl InstanceCoordinator {
    /// Create a coordinator; a random id is generated when `instance_id` is `None`
    pub fn new(
        instance_id: Option<String>,
        cache: Arc<TieredCache>,
        settings: CoordinatorSettings,
    ) -> Self {
        let hostname = settings.hostname.clone().unwrap_or_else(local_hostname);
        let instance_id = instance_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            instance_id,
            hostname,
            cache,
            settings,
            leader: AtomicBool::new(false),
            shutdown: Arc::new(ShutdownSignal::new()),
            heartbeat_handle: Mutex::new(None),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    fn instance_key(&self) -> String {
        keys::instance_key(&self.instance_id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register this instance and start the heartbeat loop
    pub async fn start(self: &Arc<Self>) -> CourierResult<()> {
        self.register().await?;
        self.refresh_leadership().await;

        let mut handle = self.heartbeat_handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        self.shutdown.reset();
        *handle = Some(tokio::spawn(heartbeat_loop(
            Arc::downgrade(self),
            Arc::clone(&self.shutdown),
            self.settings.heartbeat_interval,
        )));

        info!(
            instance_id = %self.instance_id,
            hostname = %self.hostname,
            region = %self.settings.region,
            heartbeat_interval_secs = self.settings.heartbeat_interval.as_secs(),
            "🚀 Instance coordinator started"
        );
        Ok(())
    }

    /// Stop the heartbeat loop and mark this instance stopped (best-effort)
    pub async fn stop(&self) {
        self.shutdown.trigger();
        let handle = self.heartbeat_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log_error("instance_coordinator", "stop", &e.to_string(), None);
            }
        }
        self.leader.store(false, Ordering::Release);

        let key = self.instance_key();
        let result = match self.cache.get_uncached::<InstanceRecord>(&key).await {
            Ok(Some(record)) => {
                self.cache
                    .set(&key, &record.stopped(), Some(self.settings.instance_ttl))
                    .await
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => log_coordination_operation("stop", &self.instance_id, Some(&key), "stopped"),
            Err(e) => warn!(
                instance_id = %self.instance_id,
                error = %e,
                "Failed to mark instance stopped; record will expire by TTL"
            ),
        }
    }

    /// Write a fresh record (create-if-absent, else overwrite)
    pub async fn register(&self) -> CourierResult<InstanceRecord> {
        let key = self.instance_key();
        let record = InstanceRecord::new(&self.instance_id, &self.hostname, &self.settings.region);
        let ttl = self.settings.instance_ttl;

        let created = self.cache.put_if_absent(&key, &record, ttl).await?;
        if !created {
            // Leftover record from an earlier run with the same id
            self.cache.set(&key, &record, Some(ttl)).await?;
        }
        log_coordination_operation(
            "register",
            &self.instance_id,
            Some(&key),
            if created { "created" } else { "replaced" },
        );
        Ok(record)
    }

    /// Refresh this instance's record once; never fails
    pub async fn heartbeat_tick(&self) -> HeartbeatOutcome {
        let key = self.instance_key();
        let outcome = match self.cache.get_uncached::<InstanceRecord>(&key).await {
            Ok(Some(record)) => {
                match self
                    .cache
                    .set(&key, &record.refreshed(), Some(self.settings.instance_ttl))
                    .await
                {
                    Ok(()) => HeartbeatOutcome::Refreshed,
                    Err(e) => {
                        warn!(
                            instance_id = %self.instance_id,
                            error = %e,
                            "Heartbeat write failed"
                        );
                        HeartbeatOutcome::Skipped
                    }
                }
            }
            Ok(None) => match self.register().await {
                Ok(_) => {
                    info!(
                        instance_id = %self.instance_id,
                        "Instance record was missing, re-registered"
                    );
                    HeartbeatOutcome::Reregistered
                }
                Err(e) => {
                    warn!(instance_id = %self.instance_id, error = %e, "Re-registration failed");
                    HeartbeatOutcome::Skipped
                }
            },
            Err(e) => {
                warn!(instance_id = %self.instance_id, error = %e, "Heartbeat read failed");
                HeartbeatOutcome::Skipped
            }
        };

        if outcome != HeartbeatOutcome::Skipped {
            self.refresh_leadership().await;
        }
        debug!(instance_id = %self.instance_id, outcome = ?outcome, "Heartbeat tick");
        outcome
    }

    // =========================================================================
    // Locks
    // =========================================================================

    /// Generic lock; `true` iff this call created it
    pub async fn acquire_lock(&self, id: &str, ttl: Duration) -> bool {
        self.acquire_scoped_lock(GENERIC_LOCK_SCOPE, id, ttl).await
    }

    pub async fn release_lock(&self, id: &str) -> bool {
        self.release_scoped_lock(GENERIC_LOCK_SCOPE, id).await
    }

    /// Task-processing dedup lock with the default lock TTL
    pub async fn acquire_task_lock(&self, task_id: &str) -> bool {
        self.acquire_scoped_lock(TASK_LOCK_SCOPE, task_id, self.settings.default_lock_ttl)
            .await
    }

    pub async fn release_task_lock(&self, task_id: &str) -> bool {
        self.release_scoped_lock(TASK_LOCK_SCOPE, task_id).await
    }

    /// Create-if-absent `lock:<scope>:<id>`; store errors count as not acquired
    pub async fn acquire_scoped_lock(&self, scope: &str, id: &str, ttl: Duration) -> bool {
        let key = keys::lock_key(scope, id);
        self.try_lock_key(&key, ttl).await
    }

    pub(crate) async fn try_lock_key(&self, key: &str, ttl: Duration) -> bool {
        let token = self.lock_token();
        match self.cache.put_if_absent(key, &token, ttl).await {
            Ok(acquired) => {
                log_coordination_operation(
                    "acquire_lock",
                    &self.instance_id,
                    Some(key),
                    if acquired { "acquired" } else { "held" },
                );
                acquired
            }
            Err(e) => {
                log_error(
                    "instance_coordinator",
                    "acquire_lock",
                    &e.to_string(),
                    Some(key),
                );
                false
            }
        }
    }

    /// Delete the lock if this instance owns it; `true` iff it was deleted
    pub async fn release_scoped_lock(&self, scope: &str, id: &str) -> bool {
        let key = keys::lock_key(scope, id);
        let owner = match self.cache.get_uncached::<String>(&key).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read lock owner, lock left to expire");
                return false;
            }
        };

        match owner {
            Some(owner) if self.owns(&owner) => match self.cache.delete(&key).await {
                Ok(()) => {
                    log_coordination_operation(
                        "release_lock",
                        &self.instance_id,
                        Some(&key),
                        "released",
                    );
                    true
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Lock release failed, lock left to expire");
                    false
                }
            },
            Some(owner) => {
                debug!(key = %key, owner = %owner, "Lock held by another instance, not released");
                false
            }
            None => false,
        }
    }

    fn lock_token(&self) -> String {
        format!("{}:{}", self.instance_id, Uuid::new_v4())
    }

    fn owns(&self, token: &str) -> bool {
        token
            .strip_prefix(self.instance_id.as_str())
            .is_some_and(|rest| rest.starts_with(':'))
    }

    // =========================================================================
    // Instances and leadership
    // =========================================================================

    /// Live instance records, oldest first
    pub async fn list_instances(&self) -> CourierResult<Vec<InstanceRecord>> {
        let keys = self.cache.keys(INSTANCE_PREFIX).await?;
        let now = Utc::now();
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            // An unreadable record may belong to an older instance, so the
            // listing fails rather than silently shrinking
            match self.cache.try_get::<InstanceRecord>(&key).await {
                Ok(Some(record)) if record.is_live(self.settings.instance_ttl, now) => {
                    records.push(record)
                }
                Ok(_) => {}
                Err(e) if e.is_infrastructure() => return Err(e.into()),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed instance record"),
            }
        }
        records.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
        Ok(records)
    }

    pub async fn get_instance_count(&self) -> CourierResult<usize> {
        Ok(self.list_instances().await?.len())
    }

    /// Whether this instance is the leader; `false` when the store cannot be read
    pub async fn is_leader(&self) -> bool {
        self.refresh_leadership().await
    }

    /// Leadership as of the last heartbeat tick, without a store round trip
    pub fn is_leader_cached(&self) -> bool {
        self.leader.load(Ordering::Acquire)
    }

    async fn refresh_leadership(&self) -> bool {
        let is_leader = match self.list_instances().await {
            Ok(records) => {
                elect_leader(&records).is_some_and(|leader| leader.id == self.instance_id)
            }
            Err(e) => {
                debug!(error = %e, "Leadership query failed, assuming not leader");
                false
            }
        };
        let previous = self.leader.swap(is_leader, Ordering::AcqRel);
        if previous != is_leader {
            log_coordination_operation(
                "leadership",
                &self.instance_id,
                None,
                if is_leader { "acquired" } else { "lost" },
            );
        }
        is_leader
    }
}

async fn heartbeat_loop(
    coordinator: Weak<InstanceCoordinator>,
    shutdown: Arc<ShutdownSignal>,
    interval: Duration,
) {
    while shutdown.sleep(interval).await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        coordinator.heartbeat_tick().await;
    }
    debug!("Instance heartbeat loop exited");
}
