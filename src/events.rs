// Event bus for EchoNote Core
// Listener registry shared by the transcription manager, settings, and vault

use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Event types emitted to listeners.
///
/// The UI subscribes to these; the core never blocks on a listener and a
/// panicking listener is isolated and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TaskAdded,
    TaskUpdated,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    TaskDeleted,
    ProcessingPaused,
    ProcessingResumed,
    SettingChanged,
    ApiKeysUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskAdded => "task_added",
            EventType::TaskUpdated => "task_updated",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::TaskCancelled => "task_cancelled",
            EventType::TaskDeleted => "task_deleted",
            EventType::ProcessingPaused => "processing_paused",
            EventType::ProcessingResumed => "processing_resumed",
            EventType::SettingChanged => "setting_changed",
            EventType::ApiKeysUpdated => "api_keys_updated",
        }
    }
}

pub type Listener = Arc<dyn Fn(EventType, &Value) + Send + Sync>;

/// Shared listener registry.
///
/// Cheap to clone; all clones share the same listener list.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener receiving `(event_type, payload)`.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(EventType, &Value) + Send + Sync + 'static,
    {
        let mut guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(Arc::new(listener));
    }

    /// Emit an event to every listener. Listener panics are caught and logged.
    pub fn emit(&self, event_type: EventType, payload: Value) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };

        for listener in listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(event_type, &payload);
            }));
            if result.is_err() {
                log::error!("Event listener panicked handling {}", event_type.as_str());
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
