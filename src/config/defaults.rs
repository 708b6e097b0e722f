// Shipped default configuration tree for EchoNote Core

use serde_json::{json, Value};

/// Build the default configuration. The user tree is deep-merged over this.
pub fn default_config() -> Value {
    json!({
        "database": {
            "path": "data.db",
            "encryption_enabled": false
        },
        "transcription": {
            "default_engine": "faster_whisper",
            "default_output_format": "txt",
            "max_concurrent_tasks": 2,
            "max_retries": 3,
            "retry_delay": 1.0,
            "faster_whisper": {
                "model_size": "small",
                "model_dir": "models"
            }
        },
        "realtime": {
            "recording_format": "wav",
            "auto_save": true,
            "default_input_source": "default",
            "default_gain": 1.0,
            "translation_engine": "none",
            "translation_source_lang": "auto",
            "translation_target_lang": "en",
            "vad_threshold": 0.5,
            "silence_duration_ms": 2000,
            "min_audio_duration": 3.0,
            "save_transcript": true,
            "create_calendar_event": true
        },
        "calendar": {
            "default_view": "month",
            "sync_interval_minutes": 15
        },
        "timeline": {
            "past_days": 7,
            "future_days": 7,
            "page_size": 50,
            "reminder_minutes": 5,
            "auto_start_enabled": true,
            "auto_stop_grace_minutes": 5,
            "stop_confirmation_delay_minutes": 5
        },
        "resource_monitor": {
            "low_memory_mb": 512,
            "high_cpu_percent": 90
        },
        "ui": {
            "theme": "system",
            "language": "en_US"
        },
        "security": {
            "encrypt_secrets": true
        }
    })
}
