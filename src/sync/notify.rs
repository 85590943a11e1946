use std::fmt;

use tracing::{error, info};

/// Severity of a user-visible banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Neutral information.
    Info,
    /// Something recovered or completed.
    Success,
    /// Something the user should know failed.
    Error,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "danger",
        })
    }
}

/// A user-visible banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Banner text.
    pub message: String,
    /// Severity.
    pub kind: NotificationKind,
}

impl Notification {
    /// Raised when a batch could not be saved.
    pub fn could_not_save() -> Self {
        Self {
            message: "Could not save changes to the server".to_string(),
            kind: NotificationKind::Error,
        }
    }

    /// Raised on the first success after [`Self::could_not_save`].
    pub fn reconnected() -> Self {
        Self {
            message: "Reconnected to server".to_string(),
            kind: NotificationKind::Success,
        }
    }
}

/// Fire-and-forget sink for user-visible banners.
pub trait Notifier: Send + Sync {
    /// Shows `notification`.
    fn notify(&self, notification: &Notification);
}

/// [`Notifier`] that writes banners to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        match notification.kind {
            NotificationKind::Error => {
                error!(kind = %notification.kind, "{}", notification.message)
            }
            _ => info!(kind = %notification.kind, "{}", notification.message),
        }
    }
}
