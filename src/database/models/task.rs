// Database models - TranscriptionTask

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Task lifecycle states.
///
/// `Pending` and `Failed` are the only states allowed to re-enter
/// `Processing`; the three terminal states never transition backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// A batch transcription task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionTask {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub audio_duration: Option<f64>,
    pub status: TaskStatus,
    pub progress: f64,
    pub language: Option<String>,
    pub engine: String,
    pub output_format: String,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Local>,
    pub started_at: Option<DateTime<Local>>,
    pub completed_at: Option<DateTime<Local>>,
}

impl TranscriptionTask {
    pub fn new(file_path: String, file_name: String, file_size: u64, engine: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path,
            file_name,
            file_size,
            audio_duration: None,
            status: TaskStatus::Pending,
            progress: 0.0,
            language: None,
            engine,
            output_format: "txt".to_string(),
            output_path: None,
            error_message: None,
            created_at: Local::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Payload shape shared by every task_* event.
    pub fn to_event_payload(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "file_name": self.file_name,
            "file_path": self.file_path,
            "status": self.status.as_str(),
            "progress": self.progress,
            "output_format": self.output_format,
            "output_path": self.output_path,
            "error_message": self.error_message,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }
}
