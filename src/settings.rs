//! # Runtime Settings and API Keys
//!
//! Shared runtime settings (`setting:<key>`) and the API key pair
//! (`api_key:<userId>` ↔ `token_to_user:<token>`) stored in the tiered cache.
//!
//! Settings favor availability: a store outage yields the caller's default.
//! Token resolution does not, so store errors surface to the caller.

use crate::cache::TieredCache;
use crate::error::{CourierError, CourierResult};
use crate::keys::{api_key_key, setting_key, token_to_user_key};
use crate::logging::log_error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TOKEN_PREFIX: &str = "ck_";

#[derive(Debug, Clone)]
pub struct SettingsStore {
    cache: Arc<TieredCache>,
}

impl SettingsStore {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }

    /// Read a setting, falling back to `default` when missing or unreadable
    pub async fn get_setting<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.cache.try_get::<T>(&setting_key(key)).await {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                warn!(setting = key, error = %e, "Setting unavailable, using default");
                default
            }
        }
    }

    /// Store a setting without expiry
    pub async fn set_setting<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> CourierResult<()> {
        if key.is_empty() {
            return Err(CourierError::ValidationError(
                "setting key must not be empty".to_string(),
            ));
        }
        self.cache.set(&setting_key(key), value, None).await?;
        debug!(setting = key, "Setting updated");
        Ok(())
    }

    pub async fn delete_setting(&self, key: &str) -> CourierResult<()> {
        self.cache.delete(&setting_key(key)).await?;
        Ok(())
    }

    /// Issue a fresh token for `user_id`, replacing any previous one
    pub async fn register_api_key(&self, user_id: &str) -> CourierResult<String> {
        if user_id.is_empty() {
            return Err(CourierError::ValidationError(
                "user id must not be empty".to_string(),
            ));
        }
        self.revoke_api_key(user_id).await?;

        let token = format!("{TOKEN_PREFIX}{}", Uuid::new_v4().simple());
        self.cache
            .set(&token_to_user_key(&token), user_id, None)
            .await?;
        if let Err(e) = self.cache.set(&api_key_key(user_id), &token, None).await {
            // Drop the half-written mapping so the token cannot resolve
            if let Err(cleanup) = self.cache.delete(&token_to_user_key(&token)).await {
                log_error(
                    "settings",
                    "register_api_key",
                    &cleanup.to_string(),
                    Some(user_id),
                );
            }
            return Err(e.into());
        }

        info!(user_id = user_id, "🔑 API key registered");
        Ok(token)
    }

    /// User owning `token`, if it is registered and current
    pub async fn resolve_token(&self, token: &str) -> CourierResult<Option<String>> {
        if !token.starts_with(TOKEN_PREFIX) {
            return Ok(None);
        }
        let Some(user_id) = self
            .cache
            .try_get::<String>(&token_to_user_key(token))
            .await?
        else {
            return Ok(None);
        };

        // A stale reverse mapping must not resolve after rotation
        let current: Option<String> = self.cache.try_get(&api_key_key(&user_id)).await?;
        Ok((current.as_deref() == Some(token)).then_some(user_id))
    }

    /// Remove `user_id`'s key pair; returns whether a key existed
    pub async fn revoke_api_key(&self, user_id: &str) -> CourierResult<bool> {
        let key = api_key_key(user_id);
        let Some(token) = self.cache.get_uncached::<String>(&key).await? else {
            return Ok(false);
        };
        self.cache.delete(&token_to_user_key(&token)).await?;
        self.cache.delete(&key).await?;
        info!(user_id = user_id, "API key revoked");
        Ok(true)
    }
}
