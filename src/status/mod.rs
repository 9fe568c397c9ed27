//! # Buffered Status Persistence
//!
//! Keeps durable-store write amplification low for high-frequency task
//! transitions while guaranteeing terminal states are written synchronously.

pub mod durable;
pub mod repository;
pub mod task_status;

pub use durable::{DurableStore, PgDurableStore, RecordingDurableStore, Row, SqlValue, Statement};
pub use repository::{
    status_update_statement, PendingStatusUpdate, StatusRepository, StatusSettings, StatusWrite,
};
pub use task_status::{TaskStatus, WriteTier};
