#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, Redis in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Courier Core
//!
//! Resilience and coordination layer for stateless message-processing instances
//! that share remote stores.
//!
//! ## Overview
//!
//! Several identical processes consume the same inbound events. This crate lets
//! them cooperate without duplicating work and keep running while any single
//! backing store is degraded.
//!
//! ## Module Organization
//!
//! - [`cache`] - In-process L1 over a primary remote cache, with health monitoring,
//!   restart and a dual-provider fallback store
//! - [`coordination`] - Instance records, heartbeats, leader election, distributed
//!   locks and inbound event dedup
//! - [`status`] - Task status transitions routed to a buffer, the fast store, or a
//!   synchronous durable write
//! - [`dispatch`] - Per-subject priority queues, rate-limit retries and a global
//!   cooldown around outbound calls
//! - [`settings`] - Runtime settings and API key records
//! - [`context`] - The process-wide handle wiring everything together
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use courier_core::config::ConfigManager;
//! use courier_core::context::CourierContext;
//! use courier_core::status::TaskStatus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! courier_core::logging::init_structured_logging(&config.config().logging);
//!
//! let context = CourierContext::from_config(config).await?;
//! context.start().await?;
//!
//! if context.coordinator().acquire_task_lock("task-42").await {
//!     context.status().update_status("task-42", TaskStatus::Processing).await?;
//! }
//!
//! context.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod coordination;
pub mod dispatch;
pub mod error;
pub mod keys;
pub mod logging;
pub mod resilience;
pub mod settings;
pub mod status;

pub use cache::{DualProviderStore, StoreBackend, StoreError, TieredCache};
pub use config::{ConfigManager, CourierConfig};
pub use context::CourierContext;
pub use coordination::{EventOutcome, InboundEvent, InstanceCoordinator};
pub use dispatch::{DispatchError, DispatchLimiter, Priority, RateLimitSignal};
pub use error::{CourierError, CourierResult};
pub use settings::SettingsStore;
pub use status::{StatusRepository, TaskStatus};
