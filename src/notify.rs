// Notification seam for EchoNote Core
// Desktop notification rendering lives in the UI layer; the core only talks
// to this trait.

use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Collaborator that delivers user-visible notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, title: &str, message: &str);

    fn send_info(&self, title: &str, message: &str) {
        self.notify(NotificationKind::Info, title, message);
    }

    fn send_success(&self, title: &str, message: &str) {
        self.notify(NotificationKind::Success, title, message);
    }

    fn send_warning(&self, title: &str, message: &str) {
        self.notify(NotificationKind::Warning, title, message);
    }

    fn send_error(&self, title: &str, message: &str) {
        self.notify(NotificationKind::Error, title, message);
    }
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Fallback notifier that routes everything to the log.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
        match kind {
            NotificationKind::Error => log::error!("[notify] {}: {}", title, message),
            NotificationKind::Warning => log::warn!("[notify] {}: {}", title, message),
            _ => log::info!("[notify] {}: {}", title, message),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every notification for assertions in scheduler/manager tests.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(NotificationKind, String, String)>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, kind: NotificationKind, title: &str, message: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((kind, title.to_string(), message.to_string()));
        }
    }

    impl RecordingNotifier {
        pub fn count_of(&self, kind: NotificationKind) -> usize {
            self.sent.lock().unwrap().iter().filter(|(k, _, _)| *k == kind).count()
        }

        pub fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, _, m)| m.clone()).collect()
        }
    }
}
