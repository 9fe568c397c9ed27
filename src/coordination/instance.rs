//! Instance records and leader selection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Active,
    Stopped,
}

/// One record per running process, stored under `instance:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub id: String,
    pub status: InstanceStatus,
    pub hostname: String,
    pub region: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn new(
        id: impl Into<String>,
        hostname: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: InstanceStatus::Active,
            hostname: hostname.into(),
            region: region.into(),
            started_at: now,
            last_heartbeat: now,
        }
    }

    /// Copy with `last_heartbeat` set to now
    pub fn refreshed(&self) -> Self {
        Self {
            last_heartbeat: Utc::now(),
            ..self.clone()
        }
    }

    pub fn stopped(&self) -> Self {
        Self {
            status: InstanceStatus::Stopped,
            last_heartbeat: Utc::now(),
            ..self.clone()
        }
    }

    /// Active and heartbeated within `ttl` of `now`
    pub fn is_live(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        if self.status != InstanceStatus::Active {
            return false;
        }
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        now.signed_duration_since(self.last_heartbeat) <= ttl
    }
}

/// Earliest-started live instance; ties broken by id
pub fn elect_leader(records: &[InstanceRecord]) -> Option<&InstanceRecord> {
    records
        .iter()
        .filter(|r| r.status == InstanceStatus::Active)
        .min_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)))
}

/// Hostname from the environment, `unknown` when not set
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
