//! # Adaptive Dispatch
//!
//! Priority-aware admission and rate-limit handling for outbound calls such as
//! message sends and queue publishes.

pub mod errors;
pub mod limiter;
pub mod priority;

pub use errors::{DispatchError, RateLimitSignal};
pub use limiter::{DispatchLimiter, DispatchSettings, DispatchStats};
pub use priority::Priority;
