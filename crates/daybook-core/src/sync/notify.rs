//! User-facing sync notifications.
//!
//! The engine only ever produces three kinds of message: "your pending edit
//! was overwritten by a newer remote version", "sync is paused for this
//! record and needs attention", and hard failures. Everything else is
//! retried silently.

use std::sync::Mutex;

use crate::model::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// An action the UI can offer alongside a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationAction {
    /// Re-mark the record dirty and clear its retry state, so the next
    /// cycle pushes it again.
    RetryEntity { kind: EntityKind, local_id: String },
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub action: Option<NotificationAction>,
}

/// Consumer of sync notifications (the UI layer, in the full application).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Default sink: forwards notifications to the log.
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn notify(&self, n: Notification) {
        match n.severity {
            Severity::Info => tracing::info!(title = %n.title, "{}", n.message),
            Severity::Warning => tracing::warn!(title = %n.title, "{}", n.message),
            Severity::Error => tracing::error!(title = %n.title, "{}", n.message),
        }
    }
}

/// Collecting sink for tests and status reporting.
#[derive(Default)]
pub struct MemoryNotificationSink {
    notifications: Mutex<Vec<Notification>>,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        match self.notifications.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl NotificationSink for MemoryNotificationSink {
    fn notify(&self, notification: Notification) {
        if let Ok(mut guard) = self.notifications.lock() {
            guard.push(notification);
        }
    }
}
