use crate::backup::function_path;
use crate::backup::notifications::Notification;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Display;
use std::time::Duration;
use validator::Validate;

/// Configuration for SMTP email notifications
///
/// Supports SSL, StartTLS, and unsecured connections. The password is kept
/// in a `RedactedString` so it never shows up in logs or debug output.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[builder(into)]
    host: String,
    port: Option<u16>,
    #[builder(into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[validate(length(min = 1))]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: Option<String>,
    #[builder(into)]
    password: Option<RedactedString>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

/// SMTP connection security modes
///
/// - `Unsecured`: Plain text connection (local relays only)
/// - `Ssl`: SSL/TLS encrypted connection from start
/// - `StartTls`: Start with plain text, then upgrade to TLS
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl Notification for SmtpNotificationConfig {
    #[named]
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()> {
        tracing::info!(
            "Sending smtp notification from {:?} to {:?}",
            self.from,
            self.to
        );
        let email = self
            .to
            .iter()
            .fold(Message::builder(), |email, send_to| {
                email.to(send_to.clone())
            })
            .from(self.from.clone())
            .subject(format!("{}", topic))
            .header(ContentType::TEXT_PLAIN)
            .body(format!("{}", msg))
            .map_err(Error::from)
            .add_msg(format!(
                "Fail to build notification email from {:?} to {:?}",
                self.from, self.to
            ))
            .add_fn_name(function_path!())?;

        let mut mailer = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }
        .map_err(Error::from)
        .add_msg(format!(
            "Failed to build smtp client for host: {:?} with mode {:?}",
            self.host, self.smtp_mode
        ))
        .add_fn_name(function_path!())?
        .timeout(self.timeout);

        if let Some(port) = self.port {
            mailer = mailer.port(port);
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            mailer = mailer.credentials(Credentials::new(
                username.clone(),
                password.expose().to_string(),
            ));
        }

        let response = mailer
            .build()
            .send(&email)
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        if response.is_positive() {
            Ok(())
        } else {
            let error_vec = response
                .message()
                .map(|m| Error::smtp_send_error(m.to_owned()))
                .collect_vec();
            if error_vec.is_empty() {
                Err(Error::smtp_send_error(format!("smtp rejected with {}", response.code())))
            } else {
                Err(Error::lots_of_error(error_vec))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    fn test_smtp_notification_send() {
        use std::env;

        // Skip if running in CI or without network
        if env::var("CI").is_ok() {
            return;
        }

        let server = maik::MockServer::builder().no_verify_credentials().build();

        let config = SmtpNotificationConfig::builder()
            .host(server.host().to_string())
            .port(server.port())
            .smtp_mode(SmtpMode::Unsecured)
            .from("backup@example.com".parse::<Mailbox>().unwrap())
            .to(vec!["ops@example.com".parse::<Mailbox>().unwrap()])
            .username("testuser")
            .password(RedactedString::new("testpass"))
            .build();

        server.start();
        std::thread::sleep(Duration::from_millis(100));

        let result = config.send("Backup of web failed", "Domain: web");

        std::thread::sleep(Duration::from_millis(200));

        if result.is_ok() {
            let assertion = maik::MailAssertion::new()
                .recipients_are(["ops@example.com"])
                .body_is("Domain: web");
            assert!(server.assert(assertion));
        }
    }

    #[test]
    fn test_smtp_notification_validation() {
        let valid_config = SmtpNotificationConfig::builder()
            .host("smtp.example.com")
            .smtp_mode(SmtpMode::Ssl)
            .from("backup@example.com".parse::<Mailbox>().unwrap())
            .to(vec!["ops@example.com".parse::<Mailbox>().unwrap()])
            .build();

        assert!(valid_config.validate().is_ok());

        let invalid_config = SmtpNotificationConfig::builder()
            .host("smtp.example.com")
            .smtp_mode(SmtpMode::Ssl)
            .from("backup@example.com".parse::<Mailbox>().unwrap())
            .to(vec![])
            .build();

        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_smtp_config_password_is_redacted() {
        let config: SmtpNotificationConfig = serde_yml::from_str(
            "host: smtp.example.com
smtp_mode: Ssl
from: backup@example.com
to: [ops@example.com]
username: backup
password: hunter22
",
        )
        .unwrap();
        assert_eq!(config.password().as_ref().map(|p| p.expose()), Some("hunter22"));
        assert!(!format!("{config:?}").contains("hunter22"));
        assert!(!serde_json::to_string(&config).unwrap().contains("hunter22"));
    }
}
