//! Reminder email composition and dispatch.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::ReminderConfig;
use crate::errors::{ReminderError, ReminderErrorKind, ReminderResult};
use crate::observability::Timer;
use crate::transport::{MailTransport, SmtpTransport};
use crate::types::{Address, Email, ReminderRecord, SendReceipt};

/// First line of every reminder body.
pub const REMINDER_SENTENCE: &str =
    "A prompt in your assistant session is still waiting for your input.";

/// Builds the reminder email for `record`.
///
/// The body reports the working directory of the current process as the
/// project path.
pub fn build_email(
    config: &ReminderConfig,
    record: &ReminderRecord,
    now: DateTime<Utc>,
) -> ReminderResult<Email> {
    let project_path = std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| ".".to_string());
    build_email_for_project(config, record, now, &project_path)
}

/// Builds the reminder email with an explicit project path.
pub fn build_email_for_project(
    config: &ReminderConfig,
    record: &ReminderRecord,
    now: DateTime<Utc>,
    project_path: &str,
) -> ReminderResult<Email> {
    let triggered_at = record.created_at.unwrap_or(now);

    let mut lines = vec![
        REMINDER_SENTENCE.to_string(),
        format!("Project path: {}", project_path),
        format!(
            "Triggered at: {}",
            triggered_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ),
    ];
    if let Some(title) = &record.title {
        lines.push(format!("Title: {}", title));
    }
    if let Some(message) = &record.message {
        lines.push(format!("Message: {}", message));
    }

    let to = config.to.to_header();
    let envelope_from = Address::new(config.from.email.as_str()).map_err(|e| {
        ReminderError::message_error(
            ReminderErrorKind::InvalidFromAddress,
            e.message().to_string(),
        )
    })?;

    Ok(Email {
        from: config.from.to_header(),
        envelope_to: Address::parse_list(&to)?,
        to,
        subject: config.subject().to_string(),
        text: lines.join("\n"),
        envelope_from,
    })
}

/// Creates the SMTP transport described by the configuration.
pub fn create_smtp_transport(config: &ReminderConfig) -> SmtpTransport {
    SmtpTransport::new(config.smtp.transport_options())
}

/// Builds and sends the reminder once.
///
/// Uses `transport` when given, otherwise an SMTP transport from `config`.
pub async fn send_email(
    config: &ReminderConfig,
    record: &ReminderRecord,
    now: DateTime<Utc>,
    transport: Option<&dyn MailTransport>,
) -> ReminderResult<SendReceipt> {
    let email = build_email(config, record, now)?;

    let smtp;
    let transport: &dyn MailTransport = match transport {
        Some(transport) => transport,
        None => {
            smtp = create_smtp_transport(config);
            &smtp
        }
    };

    let timer = Timer::start("send_email");
    let receipt = transport.send(&email).await?;
    let elapsed = timer.stop();

    tracing::info!(
        message_id = %receipt.message_id,
        accepted = receipt.accepted.len(),
        elapsed = %humantime::format_duration(elapsed),
        "Reminder email sent"
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{test_config, MockTransport};
    use crate::types::NotificationDetails;

    fn record(title: Option<&str>, message: Option<&str>) -> ReminderRecord {
        let created = DateTime::parse_from_rfc3339("2024-05-01T10:00:00.123Z")
            .unwrap()
            .with_timezone(&Utc);
        ReminderRecord::new(
            "tok",
            created,
            NotificationDetails {
                title: title.map(String::from),
                message: message.map(String::from),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_body_without_title_or_message() {
        let email =
            build_email_for_project(&test_config(), &record(None, None), Utc::now(), "/work/app")
                .unwrap();
        assert_eq!(
            email.text,
            "A prompt in your assistant session is still waiting for your input.\n\
             Project path: /work/app\n\
             Triggered at: 2024-05-01T10:00:00.123Z"
        );
    }

    #[test]
    fn test_body_with_title_and_message() {
        let email = build_email_for_project(
            &test_config(),
            &record(Some("Permission needed"), Some("Allow `rm -rf target`?")),
            Utc::now(),
            "/work/app",
        )
        .unwrap();
        let lines: Vec<&str> = email.text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[3], "Title: Permission needed");
        assert_eq!(lines[4], "Message: Allow `rm -rf target`?");
    }

    #[test]
    fn test_triggered_at_falls_back_to_now() {
        let now = DateTime::parse_from_rfc3339("2024-06-01T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let email =
            build_email_for_project(&test_config(), &ReminderRecord::bare("tok"), now, "/p").unwrap();
        assert!(email.text.contains("Triggered at: 2024-06-01T08:30:00.000Z"));
    }

    #[test]
    fn test_headers_and_envelope() {
        let email =
            build_email_for_project(&test_config(), &record(None, None), Utc::now(), "/p").unwrap();
        assert_eq!(email.from, "Reminder Bot <bot@example.com>");
        assert_eq!(email.to, "dev@example.com, ops@example.com");
        assert_eq!(email.subject, crate::config::DEFAULT_SUBJECT);
        assert_eq!(email.envelope_from.email, "bot@example.com");
        assert_eq!(email.envelope_to.len(), 2);
    }

    #[test]
    fn test_project_path_is_current_dir() {
        let email = build_email(&test_config(), &record(None, None), Utc::now()).unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert!(email.text.contains(&format!("Project path: {}", cwd.display())));
    }

    #[tokio::test]
    async fn test_send_email_uses_supplied_transport() {
        let transport = MockTransport::new();
        let receipt = send_email(&test_config(), &record(Some("T"), None), Utc::now(), Some(&transport))
            .await
            .unwrap();

        assert_eq!(receipt.accepted.len(), 2);
        let sent = transport.sent_emails();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("Title: T"));
    }

    #[tokio::test]
    async fn test_send_email_propagates_failure() {
        let transport = MockTransport::new();
        transport.fail_next_with(ReminderError::from_smtp_response(
            535,
            "Bad credentials",
        ));

        let err = send_email(&test_config(), &record(None, None), Utc::now(), Some(&transport))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ReminderErrorKind::CredentialsInvalid);
        assert!(transport.sent_emails().is_empty());
    }
}
