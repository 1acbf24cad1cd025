use crate::backup::notifications::smtp::SmtpNotificationConfig;
use crate::backup::result_error::result::Result;
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::result;
use validator::{Validate, ValidationErrors};

pub mod smtp;

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationConfig {
    Smtp(SmtpNotificationConfig),
}

impl Validate for NotificationConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Smtp(inner) => inner.validate(),
        }
    }
}

impl Notification for NotificationConfig {
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()> {
        match self {
            Self::Smtp(inner) => inner.send(topic, msg),
        }
    }
}

/// Operator alerting.
pub trait Notification {
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()>;
}

/// Sends through `notifier` if there is one. Failing to alert is logged, it
/// never fails the backup itself.
pub fn notify<N: Notification, D1: Display, D2: Display>(notifier: Option<&N>, topic: D1, msg: D2) {
    match notifier {
        Some(notifier) => {
            if let Err(e) = notifier.send(&topic, &msg) {
                tracing::error!("Failed to send notification {:?}: {e}", topic.to_string());
            }
        }
        None => tracing::warn!("No notification configured, dropping alert: {topic}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::RecordingNotifier;

    #[test]
    fn test_notify_forwards_to_notifier() {
        let notifier = RecordingNotifier::default();
        notify(Some(&notifier), "topic", "body");
        assert_eq!(
            notifier.sent.borrow().as_slice(),
            &[("topic".to_string(), "body".to_string())]
        );
    }

    #[test]
    fn test_notify_without_notifier_does_nothing() {
        notify::<RecordingNotifier, _, _>(None, "topic", "body");
    }

    #[test]
    fn test_notification_config_deserialization() {
        let config: NotificationConfig = serde_yml::from_str(
            "type: smtp
host: smtp.example.com
smtp_mode: StartTls
from: Backup <backup@example.com>
to: [ops@example.com]
username: backup
password: hunter22
timeout: 30s
",
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }
}
