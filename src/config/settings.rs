// Settings manager for EchoNote Core
// High-level interface over ConfigManager with change notifications

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{DEFAULT_TRANSLATION_TARGET_LANGUAGE, TRANSLATION_ENGINE_NONE};
use crate::error::CoreResult;
use crate::events::{EventBus, EventType};

use super::ConfigManager;

/// Realtime recording defaults resolved from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimePreferences {
    pub recording_format: String,
    pub auto_save: bool,
    pub default_input_source: String,
    pub default_gain: f32,
    pub translation_engine: String,
    pub translation_source_lang: String,
    pub translation_target_lang: String,
    pub vad_threshold: f32,
    pub silence_duration_ms: u64,
    pub min_audio_duration: f64,
    pub save_transcript: bool,
    pub create_calendar_event: bool,
}

impl Default for RealtimePreferences {
    fn default() -> Self {
        Self {
            recording_format: "wav".to_string(),
            auto_save: true,
            default_input_source: "default".to_string(),
            default_gain: 1.0,
            translation_engine: TRANSLATION_ENGINE_NONE.to_string(),
            translation_source_lang: "auto".to_string(),
            translation_target_lang: DEFAULT_TRANSLATION_TARGET_LANGUAGE.to_string(),
            vad_threshold: 0.5,
            silence_duration_ms: 2000,
            min_audio_duration: 3.0,
            save_transcript: true,
            create_calendar_event: true,
        }
    }
}

/// Timeline scheduling preferences resolved from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelinePreferences {
    pub reminder_minutes: i64,
    pub auto_start_enabled: bool,
    pub auto_stop_grace_minutes: i64,
    pub stop_confirmation_delay_minutes: i64,
    pub page_size: usize,
}

/// Validated settings facade emitting `setting_changed` events.
pub struct SettingsManager {
    config: Arc<ConfigManager>,
    events: EventBus,
}

impl SettingsManager {
    pub fn new(config: Arc<ConfigManager>, events: EventBus) -> Self {
        log::info!("Settings manager initialized");
        Self { config, events }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.config.get(key)
    }

    /// Set a value; emits `setting_changed` only when validation passed and
    /// the stored value actually changed.
    pub fn set(&self, key: &str, value: Value) -> CoreResult<()> {
        let old_value = self.config.get(key);
        self.config.set(key, value.clone())?;

        if let Err(e) = self.config.save() {
            log::warn!("Failed to persist setting '{}': {:#}", key, e);
        }

        if old_value.as_ref() != Some(&value) {
            log::info!("Setting '{}' changed to {}", key, value);
            self.events.emit(
                EventType::SettingChanged,
                json!({"key": key, "value": value}),
            );
        }
        Ok(())
    }

    /// Restore one key (or the full tree when `key` is `None`) to defaults.
    pub fn reset_to_default(&self, key: Option<&str>) -> CoreResult<()> {
        match key {
            Some(key) => {
                let default_value = self.config.get_default(key);
                self.config.unset(key);
                if let Err(e) = self.config.save() {
                    log::warn!("Failed to persist reset of '{}': {:#}", key, e);
                }
                self.events.emit(
                    EventType::SettingChanged,
                    json!({"key": key, "value": default_value}),
                );
            }
            None => {
                log::info!("Resetting all settings to defaults");
                self.config.clear_user_config();
                if let Err(e) = self.config.save() {
                    log::warn!("Failed to persist settings reset: {:#}", e);
                }
                self.events.emit(
                    EventType::SettingChanged,
                    json!({"key": "*", "value": null}),
                );
            }
        }
        Ok(())
    }

    /// Notify engine holders that stored credentials changed.
    pub fn notify_api_keys_updated(&self) {
        self.events.emit(EventType::ApiKeysUpdated, json!({}));
    }

    pub fn get_defaults(&self) -> Value {
        self.config.get_defaults()
    }

    fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| default.to_string())
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn get_realtime_preferences(&self) -> RealtimePreferences {
        let d = RealtimePreferences::default();
        RealtimePreferences {
            recording_format: self.get_str("realtime.recording_format", &d.recording_format),
            auto_save: self.get_bool("realtime.auto_save", d.auto_save),
            default_input_source: self
                .get_str("realtime.default_input_source", &d.default_input_source),
            default_gain: self.get_f64("realtime.default_gain", d.default_gain as f64) as f32,
            translation_engine: self
                .get_str("realtime.translation_engine", &d.translation_engine),
            translation_source_lang: self
                .get_str("realtime.translation_source_lang", &d.translation_source_lang),
            translation_target_lang: self
                .get_str("realtime.translation_target_lang", &d.translation_target_lang),
            vad_threshold: self.get_f64("realtime.vad_threshold", d.vad_threshold as f64) as f32,
            silence_duration_ms: self
                .get_i64("realtime.silence_duration_ms", d.silence_duration_ms as i64)
                .max(0) as u64,
            min_audio_duration: self
                .get_f64("realtime.min_audio_duration", d.min_audio_duration),
            save_transcript: self.get_bool("realtime.save_transcript", d.save_transcript),
            create_calendar_event: self
                .get_bool("realtime.create_calendar_event", d.create_calendar_event),
        }
    }

    pub fn get_timeline_preferences(&self) -> TimelinePreferences {
        TimelinePreferences {
            reminder_minutes: self.get_i64("timeline.reminder_minutes", 5),
            auto_start_enabled: self.get_bool("timeline.auto_start_enabled", true),
            auto_stop_grace_minutes: self.get_i64("timeline.auto_stop_grace_minutes", 5),
            stop_confirmation_delay_minutes: self
                .get_i64("timeline.stop_confirmation_delay_minutes", 5),
            page_size: self.get_i64("timeline.page_size", 50).max(1) as usize,
        }
    }

    pub fn get_theme(&self) -> String {
        self.get_str("ui.theme", "system")
    }

    pub fn get_language(&self) -> String {
        self.get_str("ui.language", "en_US")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn create_settings() -> (tempfile::TempDir, SettingsManager, EventBus) {
        let dir = tempdir().unwrap();
        let config = Arc::new(ConfigManager::new(dir.path()).unwrap());
        let events = EventBus::new();
        let settings = SettingsManager::new(config, events.clone());
        (dir, settings, events)
    }

    #[test]
    fn test_set_emits_setting_changed() {
        let (_dir, settings, events) = create_settings();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        events.subscribe(move |event_type, payload| {
            if event_type == EventType::SettingChanged {
                seen_clone.lock().unwrap().push(payload.clone());
            }
        });

        settings.set("ui.theme", json!("dark")).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["key"], "ui.theme");
        assert_eq!(seen[0]["value"], "dark");
    }

    #[test]
    fn test_invalid_set_emits_nothing_and_keeps_value() {
        let (_dir, settings, events) = create_settings();
        let emitted = Arc::new(AtomicUsize::new(0));
        let emitted_clone = emitted.clone();
        events.subscribe(move |_, _| {
            emitted_clone.fetch_add(1, Ordering::SeqCst);
        });

        let result = settings.set("resource_monitor.high_cpu_percent", json!(150));
        assert!(result.is_err());
        assert_eq!(emitted.load(Ordering::SeqCst), 0);
        assert_eq!(
            settings.get("resource_monitor.high_cpu_percent"),
            Some(json!(90))
        );
    }

    #[test]
    fn test_unchanged_value_emits_nothing() {
        let (_dir, settings, events) = create_settings();
        let emitted = Arc::new(AtomicUsize::new(0));
        let emitted_clone = emitted.clone();
        events.subscribe(move |_, _| {
            emitted_clone.fetch_add(1, Ordering::SeqCst);
        });

        settings.set("ui.theme", json!("system")).unwrap();
        assert_eq!(emitted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_then_reset_round_trip() {
        let (_dir, settings, _events) = create_settings();

        settings.set("timeline.reminder_minutes", json!(30)).unwrap();
        assert_eq!(settings.get("timeline.reminder_minutes"), Some(json!(30)));

        settings.reset_to_default(Some("timeline.reminder_minutes")).unwrap();
        assert_eq!(settings.get("timeline.reminder_minutes"), Some(json!(5)));
    }

    #[test]
    fn test_reset_all_emits_wildcard() {
        let (_dir, settings, events) = create_settings();
        let keys = Arc::new(Mutex::new(Vec::new()));
        let keys_clone = keys.clone();
        events.subscribe(move |_, payload| {
            keys_clone
                .lock()
                .unwrap()
                .push(payload["key"].as_str().unwrap_or("").to_string());
        });

        settings.set("ui.theme", json!("light")).unwrap();
        settings.reset_to_default(None).unwrap();

        assert_eq!(settings.get("ui.theme"), Some(json!("system")));
        assert!(keys.lock().unwrap().contains(&"*".to_string()));
    }

    #[test]
    fn test_realtime_preferences_pick_up_overrides() {
        let (_dir, settings, _events) = create_settings();
        settings.set("realtime.vad_threshold", json!(0.8)).unwrap();
        settings
            .set("realtime.translation_engine", json!("google"))
            .unwrap();

        let prefs = settings.get_realtime_preferences();
        assert!((prefs.vad_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(prefs.translation_engine, "google");
        assert_eq!(prefs.silence_duration_ms, 2000);
    }
}
