//! Key-value backend implementations

pub mod edge;
mod http;
pub mod memory;
pub mod redis;
pub mod rest;

pub use edge::EdgeKvStore;
pub use memory::MemoryKvStore;
pub use self::redis::RedisKvStore;
pub use rest::RestKvStore;
