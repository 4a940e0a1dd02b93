//! Notification sink driven by the supervisor.

use log::info;

/// Receiver for user-facing notifications (title, body, silence flag).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str, silent: bool);
}

/// Default sink: writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, title: &str, body: &str, silent: bool) {
        if !silent {
            info!("{title}: {body}");
        }
    }
}

/// Sink that records every notification; used by the test suites.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: std::sync::Mutex<Vec<(String, String, bool)>>,
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, title: &str, body: &str, silent: bool) {
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string(), silent));
    }
}
