//! # Resilience Module
//!
//! Fault-tolerance building blocks shared by the cache, coordination and
//! dispatch layers.
//!
//! - **Connection state**: atomic `Connecting → Ready → Degraded → Restarting`
//!   tracking for the primary remote cache
//! - **Backoff**: capped restart delays and jitter for retry loops
//! - **Shutdown**: cancelable sleeps for interval-driven background loops

pub mod backoff;
pub mod connection_state;
pub mod shutdown;

pub use backoff::{restart_delay, with_jitter};
pub use connection_state::{ConnectionHealth, ConnectionState, PingVerdict};
pub use shutdown::ShutdownSignal;
