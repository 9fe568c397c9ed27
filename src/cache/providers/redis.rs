//! Redis primary cache provider
//!
//! Uses a single multiplexed async connection. Reconnection is not automatic:
//! the tiered cache owns the restart routine and swaps in a fresh client.

use crate::cache::errors::{StoreError, StoreResult};
use crate::cache::traits::KvStore;
use crate::config::RedisConfig;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::debug;

/// `SCAN MATCH` pattern for keys starting with `prefix`, glob characters escaped
pub(crate) fn scan_match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Redis-backed store over one multiplexed connection
#[derive(Clone)]
pub struct RedisKvStore {
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKvStore")
            .field("connection", &"MultiplexedConnection")
            .finish()
    }
}

impl RedisKvStore {
    /// Open a new client and connection from configuration
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            StoreError::InvalidRequest(format!("Failed to create Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {e}")))?;

        debug!(url = %redact_url(&config.url), "Redis store connected");
        Ok(Self { connection })
    }
}

impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        debug!(key = key, hit = value.is_some(), "Redis GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        debug!(key = key, "Redis SET");
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        debug!(key = key, "Redis DEL");
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = scan_match_pattern(prefix);
        let mut found = Vec::new();
        let mut cursor: u64 = 0;

        // SCAN never blocks the server the way KEYS does
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            found.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(found)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

/// Strip credentials from a Redis URL before logging it
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
