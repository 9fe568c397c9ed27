//! # Instance Coordination
//!
//! Cross-instance decisions over eventually-consistent shared stores:
//! instance registration and heartbeats, advisory leadership, distributed
//! locks and inbound event deduplication.
//!
//! Locks are best-effort, not linearizable. They gate idempotent dedup work,
//! and leadership only gates singleton jobs that tolerate a second leader.

pub mod coordinator;
pub mod dedup;
pub mod instance;

pub use coordinator::{CoordinatorSettings, HeartbeatOutcome, InstanceCoordinator};
pub use dedup::{EventOutcome, InboundEvent};
pub use instance::{elect_leader, InstanceRecord, InstanceStatus};
