// Speech engine contract for EchoNote Core
// Concrete backends (local whisper, cloud STT) live outside the core

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

/// One recognized span of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Structured transcription result; this is the internal JSON artifact
/// persisted under `transcripts/<task_id>.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub segments: Vec<TranscriptSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl TranscriptionResult {
    /// Concatenated plain text of all segments.
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Engine-only knobs passed through from task submission; the core persists
/// them per task but does not interpret them.
pub type EngineOptions = HashMap<String, Value>;

/// Engine option keys recognized at task submission.
pub const ENGINE_OPTION_KEYS: &[&str] = &[
    "model_name",
    "model_path",
    "beam_size",
    "vad_filter",
    "vad_min_silence_duration_ms",
    "prompt",
    "temperature",
];

pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Speech recognition backend contract.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the engine is ready to transcribe (model present,
    /// credentials configured).
    fn is_available(&self) -> bool {
        true
    }

    /// Transcribe a whole file. `progress` receives percentages in [0, 100].
    async fn transcribe_file(
        &self,
        path: &Path,
        language: Option<&str>,
        options: &EngineOptions,
        progress: Option<ProgressCallback>,
    ) -> CoreResult<TranscriptionResult>;

    /// Transcribe a single in-memory utterance from the realtime pipeline.
    async fn transcribe_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language: Option<&str>,
    ) -> CoreResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_text_skips_blank_segments() {
        let result = TranscriptionResult {
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "hello".to_string(),
                },
                TranscriptSegment {
                    start: 1.0,
                    end: 1.5,
                    text: "   ".to_string(),
                },
                TranscriptSegment {
                    start: 1.5,
                    end: 2.0,
                    text: "world".to_string(),
                },
            ],
            duration: Some(2.0),
            language: None,
        };
        assert_eq!(result.full_text(), "hello\nworld");
    }

    #[test]
    fn test_artifact_json_shape() {
        let result = TranscriptionResult {
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 2.0,
                text: "hi".to_string(),
            }],
            duration: Some(2.0),
            language: Some("en".to_string()),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["segments"][0]["text"], "hi");
        assert_eq!(json["duration"], 2.0);
        assert_eq!(json["language"], "en");

        let parsed: TranscriptionResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, result);
    }
}
