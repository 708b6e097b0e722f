// Configuration management for EchoNote Core
// Defaults tree deep-merged with the persisted user tree; dotted-key access

mod defaults;
mod settings;
mod validators;

pub use settings::SettingsManager;
pub use validators::validate_setting;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::storage::atomic_write_bytes;

pub const USER_CONFIG_FILE: &str = "app_config.json";

/// Manages the merged configuration with validation and persistence.
///
/// Reads resolve against defaults deep-merged with the user tree; writes land
/// in the user tree only, so `reset_to_default` simply removes the override.
pub struct ConfigManager {
    user_config_path: PathBuf,
    inner: Mutex<ConfigState>,
}

struct ConfigState {
    defaults: Value,
    user: Value,
    merged: Value,
}

impl ConfigManager {
    /// Load configuration rooted at `app_dir` (usually `~/.echonote`).
    pub fn new(app_dir: &Path) -> Result<Self> {
        let user_config_path = app_dir.join(USER_CONFIG_FILE);
        let defaults = defaults::default_config();

        let user = if user_config_path.exists() {
            let raw = std::fs::read_to_string(&user_config_path)
                .context("Failed to read user configuration")?;
            serde_json::from_str(&raw).context("Invalid JSON in user configuration")?
        } else {
            Value::Object(Map::new())
        };

        let merged = deep_merge(&defaults, &user);

        log::info!("Configuration loaded from {:?}", user_config_path);

        Ok(Self {
            user_config_path,
            inner: Mutex::new(ConfigState {
                defaults,
                user,
                merged,
            }),
        })
    }

    /// Get a value by dotted key from the merged view.
    pub fn get(&self, key: &str) -> Option<Value> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        lookup(&state.merged, key).cloned()
    }

    /// Get the shipped default for a dotted key.
    pub fn get_default(&self, key: &str) -> Option<Value> {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        lookup(&state.defaults, key).cloned()
    }

    /// Deep-cloned snapshot of the full default tree. Mutating the returned
    /// value has no effect on the manager.
    pub fn get_defaults(&self) -> Value {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.defaults.clone()
    }

    /// Deep-cloned snapshot of the merged configuration.
    pub fn get_all(&self) -> Value {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.merged.clone()
    }

    /// Set a dotted key in the user tree. Validation runs before any state
    /// is mutated; an invalid value leaves the configuration untouched.
    pub fn set(&self, key: &str, value: Value) -> CoreResult<()> {
        validators::validate_setting(key, &value)?;

        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        insert(&mut state.user, key, value)?;
        state.merged = deep_merge(&state.defaults, &state.user);
        Ok(())
    }

    /// Remove a user override so the merged view falls back to the default.
    pub fn unset(&self, key: &str) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        remove(&mut state.user, key);
        state.merged = deep_merge(&state.defaults, &state.user);
    }

    /// Drop the entire user tree, restoring shipped defaults.
    pub fn clear_user_config(&self) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.user = Value::Object(Map::new());
        state.merged = state.defaults.clone();
    }

    /// Replace the full user tree with a validated snapshot; restores the
    /// previous tree when any contained setting fails validation.
    pub fn replace_all(&self, config: Value) -> CoreResult<()> {
        if !config.is_object() {
            return Err(CoreError::validation("configuration must be an object"));
        }

        validate_tree(&config, "")?;

        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.user = config;
        state.merged = deep_merge(&state.defaults, &state.user);
        Ok(())
    }

    /// Persist the user tree atomically with owner-only permissions.
    pub fn save(&self) -> Result<()> {
        let serialized = {
            let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            serde_json::to_vec_pretty(&state.user).context("Failed to serialize configuration")?
        };

        atomic_write_bytes(&self.user_config_path, &serialized)
            .context("Failed to save configuration")?;

        log::info!("Configuration saved to {:?}", self.user_config_path);
        Ok(())
    }

    /// Reload the user tree from disk, discarding unsaved in-memory changes.
    pub fn reload(&self) -> Result<()> {
        let user = if self.user_config_path.exists() {
            let raw = std::fs::read_to_string(&self.user_config_path)
                .context("Failed to read user configuration")?;
            serde_json::from_str(&raw).context("Invalid JSON in user configuration")?
        } else {
            Value::Object(Map::new())
        };

        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.user = user;
        state.merged = deep_merge(&state.defaults, &state.user);
        Ok(())
    }
}

/// Recursively merge `override_tree` over `base` without mutating either.
fn deep_merge(base: &Value, override_tree: &Value) -> Value {
    match (base, override_tree) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut result = Map::new();
            for (key, base_value) in base_map {
                match override_map.get(key) {
                    Some(override_value) => {
                        result.insert(key.clone(), deep_merge(base_value, override_value));
                    }
                    None => {
                        result.insert(key.clone(), base_value.clone());
                    }
                }
            }
            for (key, override_value) in override_map {
                if !base_map.contains_key(key) {
                    result.insert(key.clone(), override_value.clone());
                }
            }
            Value::Object(result)
        }
        _ => override_tree.clone(),
    }
}

fn lookup<'a>(tree: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = tree;
    for part in key.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn insert(tree: &mut Value, key: &str, value: Value) -> CoreResult<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current = tree;

    for part in &parts[..parts.len() - 1] {
        let map = current
            .as_object_mut()
            .ok_or_else(|| CoreError::validation(format!("{key} traverses a non-object node")))?;
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let map = current
        .as_object_mut()
        .ok_or_else(|| CoreError::validation(format!("{key} traverses a non-object node")))?;
    map.insert(parts[parts.len() - 1].to_string(), value);
    Ok(())
}

fn remove(tree: &mut Value, key: &str) {
    let parts: Vec<&str> = key.split('.').collect();
    let mut current = tree;

    for part in &parts[..parts.len() - 1] {
        match current.as_object_mut().and_then(|m| m.get_mut(*part)) {
            Some(next) => current = next,
            None => return,
        }
    }

    if let Some(map) = current.as_object_mut() {
        map.remove(parts[parts.len() - 1]);
    }
}

fn validate_tree(tree: &Value, prefix: &str) -> CoreResult<()> {
    if let Value::Object(map) = tree {
        for (key, value) in map {
            let dotted = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if value.is_object() {
                validate_tree(value, &dotted)?;
            } else {
                validators::validate_setting(&dotted, value)?;
            }
        }
    }
    Ok(())
}
