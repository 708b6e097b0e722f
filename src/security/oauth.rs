// OAuth token management for EchoNote Core
// Encrypted per-provider token records with expiry tracking

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local};
use serde_json::{Map, Value};

use crate::storage::atomic_write_bytes;

use super::encryption::SecurityManager;

const TOKENS_FILE: &str = "oauth_tokens.enc";
/// Tokens are treated as expired this long before their real deadline so a
/// refresh happens while the old token still works.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Manages OAuth tokens for calendar providers.
///
/// The on-disk file is a JSON map `provider -> record` whose string leaves
/// are individually encrypted, so token values never touch disk in plaintext
/// while non-sensitive metadata stays inspectable.
pub struct OAuthManager {
    tokens_file: PathBuf,
    security: Arc<SecurityManager>,
    cache: Mutex<Map<String, Value>>,
}

impl OAuthManager {
    pub fn new(security: Arc<SecurityManager>, config_dir: &Path) -> Result<Self> {
        let tokens_file = config_dir.join(TOKENS_FILE);
        let cache = load_tokens(&tokens_file, &security);

        log::info!("OAuth manager initialized");

        Ok(Self {
            tokens_file,
            security,
            cache: Mutex::new(cache),
        })
    }

    fn save(&self, cache: &Map<String, Value>) -> Result<()> {
        let encrypted = self
            .security
            .encrypt_value(&Value::Object(cache.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to encrypt OAuth tokens: {e}"))?;
        let serialized =
            serde_json::to_string_pretty(&encrypted).context("Failed to serialize OAuth tokens")?;
        atomic_write_bytes(&self.tokens_file, serialized.as_bytes())
            .context("Failed to write OAuth tokens file")?;
        Ok(())
    }

    /// Store (or merge into) the token record for a provider.
    ///
    /// The refresh token is preserved unless a new non-empty one arrives;
    /// optional metadata only overwrites previously stored values when
    /// explicitly provided.
    #[allow(clippy::too_many_arguments)]
    pub fn store_token(
        &self,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<i64>,
        token_type: Option<&str>,
        scope: Option<&str>,
        extra: Option<Map<String, Value>>,
    ) -> Result<()> {
        let now = Local::now();
        let expires_at = expires_in.map(|secs| (now + Duration::seconds(secs)).to_rfc3339());

        let mut guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let mut record = guard
            .get(provider)
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();

        if let Some(refresh) = refresh_token {
            if !refresh.is_empty() {
                record.insert("refresh_token".to_string(), Value::String(refresh.into()));
            }
        }
        if let Some(scope) = scope {
            record.insert("scope".to_string(), Value::String(scope.into()));
        }
        match token_type {
            Some(token_type) => {
                record.insert("token_type".to_string(), Value::String(token_type.into()));
            }
            None => {
                record
                    .entry("token_type".to_string())
                    .or_insert_with(|| Value::String("Bearer".to_string()));
            }
        }
        if let Some(extra) = extra {
            for (key, value) in extra {
                if !value.is_null() || !record.contains_key(&key) {
                    record.insert(key, value);
                }
            }
        }

        record.insert(
            "access_token".to_string(),
            Value::String(access_token.into()),
        );
        record.insert("expires_in".to_string(), opt_i64(expires_in));
        record.insert(
            "expires_at".to_string(),
            expires_at.map(Value::String).unwrap_or(Value::Null),
        );
        record.insert(
            "stored_at".to_string(),
            Value::String(now.to_rfc3339()),
        );

        guard.insert(provider.to_string(), Value::Object(record));
        self.save(&guard)?;

        log::info!("Stored OAuth token for provider: {}", provider);
        Ok(())
    }

    pub fn get_token(&self, provider: &str) -> Option<Map<String, Value>> {
        let guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(provider).and_then(|v| v.as_object().cloned())
    }

    pub fn get_access_token(&self, provider: &str) -> Option<String> {
        self.get_token(provider)?
            .get("access_token")
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Whether the stored token is missing, unstamped, or past its deadline
    /// (with the early-refresh margin applied).
    pub fn is_token_expired(&self, provider: &str) -> bool {
        let record = match self.get_token(provider) {
            Some(record) => record,
            None => return true,
        };

        let expires_at = record.get("expires_at").and_then(|v| v.as_str());
        let expires_at = match expires_at {
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(parsed) => parsed.with_timezone(&Local),
                Err(_) => return true,
            },
            // No recorded deadline: treat as non-expiring.
            None => return false,
        };

        Local::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= expires_at
    }

    pub fn delete_token(&self, provider: &str) -> Result<()> {
        let mut guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if guard.remove(provider).is_some() {
            self.save(&guard)?;
            log::info!("Deleted OAuth token for provider: {}", provider);
        }
        Ok(())
    }

    pub fn list_providers(&self) -> Vec<String> {
        let guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        guard.keys().cloned().collect()
    }
}

fn opt_i64(value: Option<i64>) -> Value {
    value.map(|v| Value::Number(v.into())).unwrap_or(Value::Null)
}

fn load_tokens(tokens_file: &Path, security: &SecurityManager) -> Map<String, Value> {
    if !tokens_file.exists() {
        log::debug!("No existing OAuth tokens file");
        return Map::new();
    }

    let raw = match std::fs::read_to_string(tokens_file) {
        Ok(content) => content,
        Err(e) => {
            log::error!("Failed to read OAuth tokens file: {}", e);
            return Map::new();
        }
    };

    let encrypted: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            log::error!("Failed to parse OAuth tokens file: {}", e);
            return Map::new();
        }
    };

    match security.decrypt_value(&encrypted) {
        Value::Object(map) => {
            log::info!("Loaded {} OAuth token(s)", map.len());
            map
        }
        _ => Map::new(),
    }
}
