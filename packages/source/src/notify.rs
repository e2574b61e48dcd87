//! User-facing alerts for terminal fetch failures.

use async_trait::async_trait;
use taiwan_aqm_source_models::SourceKind;

/// Title used for every exhaustion alert.
pub const NOTIFICATION_TITLE: &str = "Taiwan Air Quality Monitor Error";

/// A single user-facing alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

impl Notification {
    /// Alert sent when every attempt against `api` failed.
    #[must_use]
    pub fn exhausted(api: SourceKind, attempts: u32) -> Self {
        Self {
            title: NOTIFICATION_TITLE.to_owned(),
            message: format!("Failed to fetch data after {attempts} attempts in the {api} API."),
        }
    }
}

/// Delivery channel for [`Notification`]s.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Writes notifications to the error log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        log::error!("{}: {}", notification.title, notification.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_message_names_source_and_attempts() {
        let n = Notification::exhausted(SourceKind::MicroSensor, 3);
        assert_eq!(n.title, "Taiwan Air Quality Monitor Error");
        assert_eq!(
            n.message,
            "Failed to fetch data after 3 attempts in the Micro_Sensor API."
        );
    }

    #[tokio::test]
    async fn log_notifier_accepts_notifications() {
        LogNotifier
            .notify(Notification::exhausted(SourceKind::Site, 5))
            .await;
    }
}
