//! # Remote Connection State Machine
//!
//! Tracks the health of the shared primary cache connection:
//! `Connecting → Ready → Degraded → Restarting → Ready`.
//! State is kept in an atomic so the hot read/write path never awaits a lock.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use tracing::{error, info, warn};

/// Connection states for the primary remote cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Initial connection has not been confirmed yet
    Connecting = 0,
    /// Pings succeed; traffic goes to the primary
    Ready = 1,
    /// Recent pings or operations failed; traffic goes to the fallback
    Degraded = 2,
    /// Client is being torn down and recreated
    Restarting = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Ready,
            2 => ConnectionState::Degraded,
            // Unknown values are treated as the least trusted state
            _ => ConnectionState::Restarting,
        }
    }
}

/// Outcome of recording a failed ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingVerdict {
    /// Below the failure threshold; keep pinging
    Degraded,
    /// Threshold reached; the client must be restarted
    RestartRequired,
}

/// Atomic connection health tracker
#[derive(Debug)]
pub struct ConnectionHealth {
    name: String,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
}

impl ConnectionHealth {
    pub fn new(name: impl Into<String>, failure_threshold: u32) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// A ping or operation succeeded against the current client
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        let previous = self.swap_state_unless_restarting(ConnectionState::Ready);
        if matches!(
            previous,
            Some(ConnectionState::Degraded) | Some(ConnectionState::Connecting)
        ) {
            info!(component = %self.name, "🟢 Remote connection ready");
        }
    }

    /// A ping failed against the current client
    pub fn record_ping_failure(&self) -> PingVerdict {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            error!(
                component = %self.name,
                consecutive_failures = failures,
                failure_threshold = self.failure_threshold,
                "🔴 Remote connection failed repeatedly, restart required"
            );
            return PingVerdict::RestartRequired;
        }
        self.mark_degraded();
        warn!(
            component = %self.name,
            consecutive_failures = failures,
            failure_threshold = self.failure_threshold,
            "🟡 Remote ping failed"
        );
        PingVerdict::Degraded
    }

    /// An operation against the primary hit an infrastructure error
    pub fn mark_degraded(&self) {
        if self.swap_state_unless_restarting(ConnectionState::Degraded)
            == Some(ConnectionState::Ready)
        {
            warn!(component = %self.name, "🟡 Remote connection degraded, routing to fallback");
        }
    }

    pub fn mark_restarting(&self) {
        self.state
            .store(ConnectionState::Restarting as u8, Ordering::Release);
    }

    /// A fresh client is in place and answered a ping
    pub fn mark_restarted(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.state.store(ConnectionState::Ready as u8, Ordering::Release);
        info!(component = %self.name, "🟢 Remote connection restarted");
    }

    /// Restarting is only left through `mark_restarted`
    fn swap_state_unless_restarting(&self, next: ConnectionState) -> Option<ConnectionState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == ConnectionState::Restarting as u8 || current == next as u8 {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .ok()
            .map(ConnectionState::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_connecting() {
        let health = ConnectionHealth::new("test", 3);
        assert_eq!(health.state(), ConnectionState::Connecting);
        health.record_success();
        assert!(health.is_ready());
    }

    #[test]
    fn test_threshold_requires_restart() {
        let health = ConnectionHealth::new("test", 3);
        health.record_success();
        assert_eq!(health.record_ping_failure(), PingVerdict::Degraded);
        assert_eq!(health.state(), ConnectionState::Degraded);
        assert_eq!(health.record_ping_failure(), PingVerdict::Degraded);
        assert_eq!(health.record_ping_failure(), PingVerdict::RestartRequired);
    }

    #[test]
    fn test_success_resets_failures() {
        let health = ConnectionHealth::new("test", 2);
        health.record_success();
        health.record_ping_failure();
        health.record_success();
        assert_eq!(health.consecutive_failures(), 0);
        assert_eq!(health.record_ping_failure(), PingVerdict::Degraded);
    }

    #[test]
    fn test_restarting_is_sticky_until_restarted() {
        let health = ConnectionHealth::new("test", 1);
        health.mark_restarting();
        health.record_success();
        health.mark_degraded();
        assert_eq!(health.state(), ConnectionState::Restarting);
        health.mark_restarted();
        assert_eq!(health.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_unknown_state_value_is_least_trusted() {
        assert_eq!(ConnectionState::from(42), ConnectionState::Restarting);
    }
}
