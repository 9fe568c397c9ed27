//! Edge key-value provider
//!
//! Namespace-scoped REST API in the Workers KV style:
//! `GET|PUT|DELETE <base>/values/<key>` and `GET <base>/keys?prefix=`.
//! The store is quota-limited and has no atomic create-if-absent, so
//! `put_if_absent` is a best-effort read-then-write.

use super::http::{build_client, failure_from_response};
use crate::cache::errors::{StoreError, StoreResult};
use crate::cache::traits::KvStore;
use crate::config::EdgeKvConfig;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Provider minimum for expiring keys
const MIN_EXPIRATION_TTL_SECS: u64 = 60;

#[derive(Clone)]
pub struct EdgeKvStore {
    client: reqwest::Client,
    base_url: Url,
    api_token: String,
}

impl std::fmt::Debug for EdgeKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeKvStore")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct KeyListing {
    #[serde(default)]
    result: Vec<KeyName>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct KeyName {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    cursor: Option<String>,
}

impl EdgeKvStore {
    pub fn from_config(config: &EdgeKvConfig) -> StoreResult<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            StoreError::InvalidRequest(format!("Invalid edge store URL {}: {e}", config.base_url))
        })?;
        Ok(Self {
            client: build_client(Duration::from_millis(config.timeout_ms))?,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> StoreResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidRequest("Edge store URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl KvStore for EdgeKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let url = self.endpoint(&["values", key])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            _ => Err(failure_from_response("edge get", response).await),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut url = self.endpoint(&["values", key])?;
        if let Some(ttl) = ttl {
            let seconds = ttl.as_secs().max(MIN_EXPIRATION_TTL_SECS);
            url.query_pairs_mut()
                .append_pair("expiration_ttl", &seconds.to_string());
        }

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.api_token)
            .body(value.to_string())
            .send()
            .await?;

        if response.status().is_success() {
            debug!(key = key, "Edge store PUT");
            Ok(())
        } else {
            Err(failure_from_response("edge set", response).await)
        }
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value, Some(ttl)).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let url = self.endpoint(&["values", key])?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(failure_from_response("edge delete", response).await),
        }
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut found = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut url = self.endpoint(&["keys"])?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("prefix", prefix);
                if let Some(cursor) = &cursor {
                    query.append_pair("cursor", cursor);
                }
            }

            let response = self
                .client
                .get(url)
                .bearer_auth(&self.api_token)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(failure_from_response("edge keys", response).await);
            }

            let listing: KeyListing = response.json().await?;
            found.extend(listing.result.into_iter().map(|k| k.name));

            cursor = listing
                .result_info
                .and_then(|info| info.cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        Ok(found)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let mut url = self.endpoint(&["keys"])?;
        url.query_pairs_mut().append_pair("limit", "10");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(true)
        } else {
            Err(failure_from_response("edge health", response).await)
        }
    }

    fn provider_name(&self) -> &'static str {
        "edge"
    }
}
