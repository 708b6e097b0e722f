// Per-category setting validators for EchoNote Core
// Every write goes through validate_setting before any state is mutated

use serde_json::Value;

use crate::constants::{
    FASTER_WHISPER_MODEL_SIZES, STOP_CONFIRMATION_DELAY_MAX_MINUTES,
    SUPPORTED_OUTPUT_FORMATS, SUPPORTED_RECORDING_FORMATS, SUPPORTED_TRANSCRIPTION_ENGINES,
    SUPPORTED_TRANSLATION_ENGINES, TIMELINE_REMINDER_MINUTES_OPTIONS,
};
use crate::error::{CoreError, CoreResult};

fn as_i64(value: &Value) -> Option<i64> {
    // Booleans deserialize as JSON bools, never numbers, so no bool check needed.
    value.as_i64()
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn is_nonempty_string(value: &Value) -> bool {
    value.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false)
}

fn in_str_set(value: &Value, set: &[&str]) -> bool {
    value.as_str().map(|s| set.contains(&s)).unwrap_or(false)
}

fn reject(key: &str, value: &Value, expectation: &str) -> CoreError {
    CoreError::validation(format!("{key} = {value} rejected: {expectation}"))
}

/// Validate a dotted configuration key against its category rules.
///
/// Unknown keys inside a known category are accepted, matching the original
/// behavior of only guarding the documented settings.
pub fn validate_setting(key: &str, value: &Value) -> CoreResult<()> {
    let (category, setting) = match key.split_once('.') {
        Some(parts) => parts,
        // Top-level keys (e.g. replacing a whole category) are validated on save.
        None => return Ok(()),
    };

    match category {
        "database" => validate_database(key, setting, value),
        "transcription" => validate_transcription(key, setting, value),
        "realtime" => validate_realtime(key, setting, value),
        "calendar" => validate_calendar(key, setting, value),
        "timeline" => validate_timeline(key, setting, value),
        "resource_monitor" => validate_resource_monitor(key, setting, value),
        "ui" => validate_ui(key, setting, value),
        _ => Ok(()),
    }
}

fn validate_database(key: &str, setting: &str, value: &Value) -> CoreResult<()> {
    match setting {
        "path" => {
            if !is_nonempty_string(value) {
                return Err(reject(key, value, "must be a non-empty string"));
            }
        }
        "encryption_enabled" => {
            if !value.is_boolean() {
                return Err(reject(key, value, "must be a boolean"));
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_transcription(key: &str, setting: &str, value: &Value) -> CoreResult<()> {
    match setting {
        "default_engine" => {
            if !in_str_set(value, SUPPORTED_TRANSCRIPTION_ENGINES) {
                return Err(reject(
                    key,
                    value,
                    "must be one of the supported transcription engines",
                ));
            }
        }
        "default_output_format" => {
            if !in_str_set(value, SUPPORTED_OUTPUT_FORMATS) {
                return Err(reject(key, value, "must be one of txt/srt/md"));
            }
        }
        "max_concurrent_tasks" => match as_i64(value) {
            Some(n) if (1..=5).contains(&n) => {}
            _ => return Err(reject(key, value, "must be an integer between 1 and 5")),
        },
        "max_retries" => match as_i64(value) {
            Some(n) if n >= 0 => {}
            _ => return Err(reject(key, value, "must be a non-negative integer")),
        },
        "retry_delay" => match as_f64(value) {
            Some(n) if n >= 0.0 => {}
            _ => return Err(reject(key, value, "must be a non-negative number")),
        },
        "default_save_path" => {
            if !is_nonempty_string(value) {
                return Err(reject(key, value, "must be a non-empty string"));
            }
        }
        "faster_whisper.model_size" => {
            if !in_str_set(value, FASTER_WHISPER_MODEL_SIZES) {
                return Err(reject(key, value, "must be a registered model size"));
            }
        }
        "faster_whisper.model_dir" => {
            if !value.is_string() {
                return Err(reject(key, value, "must be a string"));
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_realtime(key: &str, setting: &str, value: &Value) -> CoreResult<()> {
    match setting {
        "recording_format" => {
            if !in_str_set(value, SUPPORTED_RECORDING_FORMATS) {
                return Err(reject(key, value, "must be a supported recording format"));
            }
        }
        "translation_engine" => {
            if !in_str_set(value, SUPPORTED_TRANSLATION_ENGINES) {
                return Err(reject(key, value, "must be a supported translation engine"));
            }
        }
        "translation_source_lang" | "translation_target_lang" => {
            let ok = value
                .as_str()
                .map(|s| s.trim().len() >= 2)
                .unwrap_or(false);
            if !ok {
                return Err(reject(key, value, "must be 'auto' or a language code"));
            }
        }
        "vad_threshold" => match as_f64(value) {
            Some(n) if (0.0..=1.0).contains(&n) => {}
            _ => return Err(reject(key, value, "must be a number between 0 and 1")),
        },
        "silence_duration_ms" => match as_i64(value) {
            Some(n) if n >= 0 => {}
            _ => return Err(reject(key, value, "must be a non-negative integer")),
        },
        "min_audio_duration" => match as_f64(value) {
            Some(n) if n >= 0.0 => {}
            _ => return Err(reject(key, value, "must be a non-negative number")),
        },
        "default_gain" => match as_f64(value) {
            Some(n) if (0.0..=10.0).contains(&n) => {}
            _ => return Err(reject(key, value, "must be a number between 0 and 10")),
        },
        "auto_save" | "save_transcript" | "create_calendar_event" => {
            if !value.is_boolean() {
                return Err(reject(key, value, "must be a boolean"));
            }
        }
        "default_input_source" | "recording_save_path" => {
            if !value.is_string() {
                return Err(reject(key, value, "must be a string"));
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_calendar(key: &str, setting: &str, value: &Value) -> CoreResult<()> {
    match setting {
        "default_view" => {
            if !in_str_set(value, &["month", "week", "day"]) {
                return Err(reject(key, value, "must be month/week/day"));
            }
        }
        "sync_interval_minutes" => match as_i64(value) {
            Some(n) if n >= 1 => {}
            _ => return Err(reject(key, value, "must be a positive integer")),
        },
        s if s.starts_with("colors.") => {
            let ok = value
                .as_str()
                .map(|s| s.starts_with('#') && s.len() == 7)
                .unwrap_or(false);
            if !ok {
                return Err(reject(key, value, "must be a #rrggbb color"));
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_timeline(key: &str, setting: &str, value: &Value) -> CoreResult<()> {
    match setting {
        "past_days" | "future_days" | "page_size" => match as_i64(value) {
            Some(n) if n >= 1 => {}
            _ => return Err(reject(key, value, "must be a positive integer")),
        },
        "reminder_minutes" => match as_i64(value) {
            Some(n) if TIMELINE_REMINDER_MINUTES_OPTIONS.contains(&n) => {}
            _ => {
                return Err(reject(
                    key,
                    value,
                    "must be one of the reminder minute options",
                ))
            }
        },
        "auto_start_enabled" => {
            if !value.is_boolean() {
                return Err(reject(key, value, "must be a boolean"));
            }
        }
        "auto_stop_grace_minutes" => match as_i64(value) {
            Some(n) if n >= 0 => {}
            _ => return Err(reject(key, value, "must be a non-negative integer")),
        },
        "stop_confirmation_delay_minutes" => match as_i64(value) {
            Some(n) if n >= 1 && n <= STOP_CONFIRMATION_DELAY_MAX_MINUTES => {}
            _ => {
                return Err(reject(
                    key,
                    value,
                    "must be between 1 and the maximum stop delay",
                ))
            }
        },
        _ => {}
    }
    Ok(())
}

fn validate_resource_monitor(key: &str, setting: &str, value: &Value) -> CoreResult<()> {
    match setting {
        "low_memory_mb" => match as_f64(value) {
            Some(n) if (64.0..=1_048_576.0).contains(&n) => {}
            _ => return Err(reject(key, value, "must be between 64 and 1048576 MB")),
        },
        "high_cpu_percent" => match as_f64(value) {
            Some(n) if (1.0..=100.0).contains(&n) => {}
            _ => return Err(reject(key, value, "must be between 1 and 100")),
        },
        _ => {}
    }
    Ok(())
}

fn validate_ui(key: &str, setting: &str, value: &Value) -> CoreResult<()> {
    match setting {
        "theme" => {
            if !in_str_set(value, &["light", "dark", "system"]) {
                return Err(reject(key, value, "must be light/dark/system"));
            }
        }
        "language" => {
            if !is_nonempty_string(value) {
                return Err(reject(key, value, "must be a non-empty locale code"));
            }
        }
        _ => {}
    }
    Ok(())
}
