// Database models - EventAttachment

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Artifact kinds an event can carry; at most one of each per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Recording,
    Transcript,
    Translation,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Recording => "recording",
            AttachmentKind::Transcript => "transcript",
            AttachmentKind::Translation => "translation",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "recording" => Some(AttachmentKind::Recording),
            "transcript" => Some(AttachmentKind::Transcript),
            "translation" => Some(AttachmentKind::Translation),
            _ => None,
        }
    }

    /// Kinds whose files contain searchable text.
    pub fn is_textual(&self) -> bool {
        matches!(self, AttachmentKind::Transcript | AttachmentKind::Translation)
    }
}

/// A persistent record binding an artifact file to an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAttachment {
    pub id: String,
    pub event_id: String,
    pub kind: AttachmentKind,
    pub file_path: String,
    pub file_size: u64,
    pub created_at: DateTime<Local>,
}

impl EventAttachment {
    pub fn new(event_id: String, kind: AttachmentKind, file_path: String, file_size: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id,
            kind,
            file_path,
            file_size,
            created_at: Local::now(),
        }
    }
}
