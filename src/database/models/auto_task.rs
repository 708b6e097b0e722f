// Database models - AutoTaskConfig

use serde::{Deserialize, Serialize};

/// Per-event auto-task flags. With every flag false the config is
/// semantically disabled and the scheduler skips the event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTaskConfig {
    pub event_id: String,
    pub enable_transcription: bool,
    pub enable_recording: bool,
    pub transcription_language: Option<String>,
    pub enable_translation: bool,
    pub translation_target_language: Option<String>,
}

impl AutoTaskConfig {
    pub fn disabled(event_id: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            ..Default::default()
        }
    }

    /// Whether any auto-start action is enabled for the event.
    pub fn any_enabled(&self) -> bool {
        self.enable_transcription || self.enable_recording
    }
}
