// Database models - CalendarEvent

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A calendar event, local or mirrored from an external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub event_type: String,
    pub source: String,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub attendees: Vec<String>,
}

impl CalendarEvent {
    pub fn new(title: String, start_time: DateTime<Local>, end_time: Option<DateTime<Local>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            description: None,
            event_type: "meeting".to_string(),
            source: "local".to_string(),
            start_time,
            end_time,
            attendees: Vec::new(),
        }
    }

    /// Local-naive `[start, end]` window with end clamped to start when the
    /// event has no end or an inverted range.
    pub fn window(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.start_time.naive_local();
        let end = self
            .end_time
            .map(|e| e.naive_local())
            .unwrap_or(start);
        if end < start {
            (end, start)
        } else {
            (start, end)
        }
    }
}
