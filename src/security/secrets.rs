// Secrets manager for EchoNote Core
// Encrypted storage for API keys and other sensitive configuration

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use crate::storage::atomic_write_bytes;

use super::encryption::SecurityManager;

const SECRETS_FILE: &str = "secrets.enc";

/// Encrypted key/value store persisted as a single authenticated blob in
/// `secrets.enc`. The whole JSON document is encrypted at once; an unreadable
/// or tampered file degrades to an empty store.
pub struct SecretsManager {
    secrets_file: PathBuf,
    security: Arc<SecurityManager>,
    secrets: Mutex<Value>,
}

impl SecretsManager {
    pub fn new(security: Arc<SecurityManager>, config_dir: &Path) -> Result<Self> {
        let secrets_file = config_dir.join(SECRETS_FILE);
        let secrets = load_secrets(&secrets_file, &security);

        log::info!("Secrets manager initialized");

        Ok(Self {
            secrets_file,
            security,
            secrets: Mutex::new(secrets),
        })
    }

    pub fn security(&self) -> &SecurityManager {
        &self.security
    }

    fn save(&self, secrets: &Value) -> Result<()> {
        let serialized =
            serde_json::to_string_pretty(secrets).context("Failed to serialize secrets")?;
        let encrypted = self
            .security
            .encrypt(&serialized)
            .map_err(|e| anyhow::anyhow!("Failed to encrypt secrets: {e}"))?;
        atomic_write_bytes(&self.secrets_file, encrypted.as_bytes())
            .context("Failed to write secrets file")?;
        Ok(())
    }

    pub fn set_api_key(&self, provider: &str, api_key: &str) -> Result<()> {
        let mut guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        ensure_object(&mut guard, "api_keys");
        guard["api_keys"][provider] = json!(api_key);
        self.save(&guard)?;
        log::info!("API key set for provider: {}", provider);
        Ok(())
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        let guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        guard["api_keys"]
            .get(provider)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn delete_api_key(&self, provider: &str) -> Result<()> {
        let mut guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        let removed = guard["api_keys"]
            .as_object_mut()
            .and_then(|m| m.remove(provider))
            .is_some();
        if removed {
            self.save(&guard)?;
            log::info!("API key deleted for provider: {}", provider);
        }
        Ok(())
    }

    pub fn get_all_api_keys(&self) -> Map<String, Value> {
        let guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        guard["api_keys"]
            .as_object()
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_api_key(&self, provider: &str) -> bool {
        self.get_api_key(provider)
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    /// Store a free-form secret value under a top-level key.
    pub fn set_secret(&self, key: &str, value: Value) -> Result<()> {
        let mut guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        guard[key] = value;
        self.save(&guard)?;
        log::info!("Secret set: {}", key);
        Ok(())
    }

    pub fn get_secret(&self, key: &str) -> Option<Value> {
        let guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(key).cloned()
    }

    pub fn delete_secret(&self, key: &str) -> Result<()> {
        let mut guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        let removed = guard.as_object_mut().and_then(|m| m.remove(key)).is_some();
        if removed {
            self.save(&guard)?;
            log::info!("Secret deleted: {}", key);
        }
        Ok(())
    }

    /// Reset the store to its empty shape.
    pub fn clear_all_secrets(&self) -> Result<()> {
        let mut guard = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        *guard = empty_secrets();
        self.save(&guard)?;
        log::warn!("All secrets cleared");
        Ok(())
    }
}

fn empty_secrets() -> Value {
    json!({"api_keys": {}, "oauth_tokens": {}})
}

fn ensure_object(secrets: &mut Value, key: &str) {
    if !secrets[key].is_object() {
        secrets[key] = Value::Object(Map::new());
    }
}

fn load_secrets(secrets_file: &Path, security: &SecurityManager) -> Value {
    if !secrets_file.exists() {
        log::info!("No secrets file found, starting with empty secrets");
        return empty_secrets();
    }

    let encrypted = match std::fs::read_to_string(secrets_file) {
        Ok(content) => content,
        Err(e) => {
            log::error!("Failed to read secrets file: {}", e);
            return empty_secrets();
        }
    };

    match security
        .decrypt(&encrypted)
        .ok()
        .and_then(|plain| serde_json::from_str::<Value>(&plain).ok())
    {
        Some(secrets) if secrets.is_object() => {
            log::info!("Secrets loaded successfully");
            secrets
        }
        _ => {
            log::error!("Failed to load secrets, starting with empty store");
            empty_secrets()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_manager(dir: &Path) -> SecretsManager {
        let security = Arc::new(SecurityManager::new(dir).unwrap());
        SecretsManager::new(security, dir).unwrap()
    }

    #[test]
    fn test_api_key_lifecycle() {
        let dir = tempdir().unwrap();
        let secrets = create_manager(dir.path());

        assert!(!secrets.has_api_key("google"));
        secrets.set_api_key("google", "g-key-123").unwrap();
        assert_eq!(secrets.get_api_key("google"), Some("g-key-123".to_string()));
        assert!(secrets.has_api_key("google"));

        secrets.delete_api_key("google").unwrap();
        assert!(secrets.get_api_key("google").is_none());
    }

    #[test]
    fn test_secrets_survive_restart() {
        let dir = tempdir().unwrap();
        {
            let secrets = create_manager(dir.path());
            secrets.set_api_key("azure", "az-key").unwrap();
            secrets.set_secret("workspace", json!({"id": 7})).unwrap();
        }

        let secrets = create_manager(dir.path());
        assert_eq!(secrets.get_api_key("azure"), Some("az-key".to_string()));
        assert_eq!(secrets.get_secret("workspace"), Some(json!({"id": 7})));
    }

    #[test]
    fn test_file_on_disk_is_not_plaintext() {
        let dir = tempdir().unwrap();
        let secrets = create_manager(dir.path());
        secrets.set_api_key("google", "super-secret-key").unwrap();

        let raw = std::fs::read_to_string(dir.path().join(SECRETS_FILE)).unwrap();
        assert!(!raw.contains("super-secret-key"));
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempdir().unwrap();
        {
            let secrets = create_manager(dir.path());
            secrets.set_api_key("google", "key").unwrap();
        }
        std::fs::write(dir.path().join(SECRETS_FILE), "not ciphertext").unwrap();

        let secrets = create_manager(dir.path());
        assert!(secrets.get_api_key("google").is_none());
    }

    #[test]
    fn test_clear_all() {
        let dir = tempdir().unwrap();
        let secrets = create_manager(dir.path());
        secrets.set_api_key("a", "1").unwrap();
        secrets.set_api_key("b", "2").unwrap();

        secrets.clear_all_secrets().unwrap();
        assert!(secrets.get_all_api_keys().is_empty());
    }
}
