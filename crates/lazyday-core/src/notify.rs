//! Notification sink for user-facing status messages.
//!
//! Hooks report mutation outcomes and fetch failures here. The sink only
//! receives messages; nothing flows back into the cache.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastStatus {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for ToastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToastStatus::Info => write!(f, "info"),
            ToastStatus::Success => write!(f, "success"),
            ToastStatus::Warning => write!(f, "warning"),
            ToastStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub title: String,
    pub status: ToastStatus,
}

impl Toast {
    pub fn new(title: impl Into<String>, status: ToastStatus) -> Self {
        Self {
            title: title.into(),
            status,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Forwards notifications to whoever renders them.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Toast>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, toast: Toast) {
        debug!(status = %toast.status, title = %toast.title, "Notification");
        if self.tx.send(toast).is_err() {
            warn!("Notification receiver dropped");
        }
    }
}

/// Keeps every notification, for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingNotifier {
    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn statuses(&self) -> Vec<ToastStatus> {
        self.toasts().into_iter().map(|t| t.status).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, toast: Toast) {
        self.toasts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(toast);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::default();
        notifier.notify(Toast::new("a", ToastStatus::Info));
        notifier.notify(Toast::new("b", ToastStatus::Warning));
        assert_eq!(notifier.statuses(), vec![ToastStatus::Info, ToastStatus::Warning]);
        assert_eq!(notifier.toasts()[1].title, "b");
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Toast::new("User updated!", ToastStatus::Success));
        let toast = rx.recv().await.unwrap();
        assert_eq!(toast.status, ToastStatus::Success);
        assert_eq!(serde_json::to_value(toast.status).unwrap(), "success");
    }
}
