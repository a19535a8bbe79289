use std::fmt;

use async_trait::async_trait;
use tracing::info;

/// An outbound message (booking confirmation and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug)]
pub struct NotifyError(pub String);

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Delivery seam for confirmations. Callers never wait on it for correctness:
/// a failed send is logged and dropped.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            to = %notification.to,
            subject = %notification.subject,
            "notification: {}",
            notification.body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_accepts_everything() {
        let n = Notification {
            to: "skipper@example.com".into(),
            subject: "Booking confirmed".into(),
            body: "see you on board".into(),
        };
        assert!(LogNotifier.send(n).await.is_ok());
    }

    #[test]
    fn notify_error_display() {
        let e = NotifyError("smtp timeout".into());
        assert_eq!(e.to_string(), "notification failed: smtp timeout");
    }
}
