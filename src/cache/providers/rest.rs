//! REST key-value provider
//!
//! Redis-over-HTTP: each call POSTs a JSON command array (`["GET", key]`) and
//! receives `{"result": ...}` or `{"error": "..."}`. Supports atomic
//! `SET NX EX`, so locks are exact on this provider.

use super::http::{build_client, failure_from_response, mentions_quota};
use super::redis::scan_match_pattern;
use crate::cache::errors::{StoreError, StoreResult};
use crate::cache::traits::KvStore;
use crate::config::RestKvConfig;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct RestKvStore {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl std::fmt::Debug for RestKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestKvStore").field("url", &self.url).finish()
    }
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl RestKvStore {
    pub fn from_config(config: &RestKvConfig) -> StoreResult<Self> {
        if config.url.trim().is_empty() {
            return Err(StoreError::InvalidRequest("REST store URL is empty".into()));
        }
        Ok(Self {
            client: build_client(Duration::from_millis(config.timeout_ms))?,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn command(&self, operation: &str, args: Vec<String>) -> StoreResult<Value> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(failure_from_response(operation, response).await);
        }

        let reply: CommandReply = response.json().await?;
        match reply.error {
            Some(error) if mentions_quota(&error) => {
                Err(StoreError::QuotaExceeded(format!("{operation}: {error}")))
            }
            Some(error) => Err(StoreError::Backend(format!("{operation}: {error}"))),
            None => Ok(reply.result),
        }
    }
}

impl KvStore for RestKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.command("rest get", vec!["GET".into(), key.into()]).await? {
            Value::Null => Ok(None),
            Value::String(value) => Ok(Some(value)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut args = vec!["SET".to_string(), key.to_string(), value.to_string()];
        if let Some(ttl) = ttl {
            args.push("EX".into());
            args.push(ttl.as_secs().max(1).to_string());
        }
        self.command("rest set", args).await?;
        debug!(key = key, "REST store SET");
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let args = vec![
            "SET".to_string(),
            key.to_string(),
            value.to_string(),
            "NX".to_string(),
            "EX".to_string(),
            ttl.as_secs().max(1).to_string(),
        ];
        let result = self.command("rest set nx", args).await?;
        Ok(!result.is_null())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.command("rest delete", vec!["DEL".into(), key.into()])
            .await?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = scan_match_pattern(prefix);
        let mut found = Vec::new();
        let mut cursor = "0".to_string();

        loop {
            let result = self
                .command(
                    "rest scan",
                    vec![
                        "SCAN".into(),
                        cursor.clone(),
                        "MATCH".into(),
                        pattern.clone(),
                        "COUNT".into(),
                        "100".into(),
                    ],
                )
                .await?;

            let (next_cursor, keys) = parse_scan_reply(result)?;
            found.extend(keys);
            if next_cursor == "0" {
                break;
            }
            cursor = next_cursor;
        }

        Ok(found)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let result = self.command("rest ping", vec!["PING".into()]).await?;
        Ok(result.as_str() == Some("PONG"))
    }

    fn provider_name(&self) -> &'static str {
        "rest"
    }
}

fn parse_scan_reply(result: Value) -> StoreResult<(String, Vec<String>)> {
    let malformed = || StoreError::Backend(format!("Malformed SCAN reply: {result}"));
    let parts = result.as_array().ok_or_else(malformed)?;
    let cursor = match parts.first() {
        Some(Value::String(cursor)) => cursor.clone(),
        Some(Value::Number(cursor)) => cursor.to_string(),
        _ => return Err(malformed()),
    };
    let keys = parts
        .get(1)
        .and_then(Value::as_array)
        .ok_or_else(malformed)?
        .iter()
        .filter_map(|k| k.as_str().map(str::to_string))
        .collect();
    Ok((cursor, keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_scan_reply() {
        let (cursor, keys) = parse_scan_reply(json!(["12", ["instance:a", "instance:b"]])).unwrap();
        assert_eq!(cursor, "12");
        assert_eq!(keys, vec!["instance:a", "instance:b"]);

        let (cursor, keys) = parse_scan_reply(json!([0, []])).unwrap();
        assert_eq!(cursor, "0");
        assert!(keys.is_empty());

        assert!(parse_scan_reply(json!({"unexpected": true})).is_err());
    }

    #[test]
    fn test_rejects_empty_url() {
        let config = RestKvConfig {
            url: "  ".into(),
            token: "t".into(),
            timeout_ms: 100,
        };
        assert!(RestKvStore::from_config(&config).is_err());
    }
}
