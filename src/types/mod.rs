//! Core types for the reminder hook.
//!
//! This module provides:
//! - The persisted reminder record and its derived status
//! - Notification payload extraction
//! - Outgoing email and address types
//! - Check outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::{ReminderError, ReminderErrorKind, ReminderResult};

/// The single persisted reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRecord {
    /// Binds a `start` to its later `check`.
    pub token: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Assistant session that raised the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Notification type reported by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
    /// Notification title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Notification message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set when the reminder was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
    /// Set after successful delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Set when the delayed send failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at: Option<DateTime<Utc>>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ReminderRecord {
    /// Creates a fresh record from notification details.
    pub fn new(token: impl Into<String>, created_at: DateTime<Utc>, details: NotificationDetails) -> Self {
        Self {
            token: token.into(),
            created_at: Some(created_at),
            session_id: details.session_id,
            notification_type: details.kind,
            title: details.title,
            message: details.message,
            ..Self::bare(String::new())
        }
    }

    /// Record carrying only a token, used to report failures when the store is empty.
    pub fn bare(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            created_at: None,
            session_id: None,
            notification_type: None,
            title: None,
            message: None,
            cleared_at: None,
            sent_at: None,
            error_at: None,
            error_message: None,
        }
    }

    /// Returns the lifecycle status.
    pub fn status(&self) -> ReminderStatus {
        if self.sent_at.is_some() {
            ReminderStatus::Sent
        } else if self.cleared_at.is_some() {
            ReminderStatus::Cleared
        } else if self.error_at.is_some() {
            ReminderStatus::Errored
        } else {
            ReminderStatus::Created
        }
    }
}

/// Lifecycle status of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderStatus {
    /// Waiting for the delayed check.
    Created,
    /// Cancelled before firing.
    Cleared,
    /// Delivered.
    Sent,
    /// Delivery failed; never retried.
    Errored,
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReminderStatus::Created => write!(f, "created"),
            ReminderStatus::Cleared => write!(f, "cleared"),
            ReminderStatus::Sent => write!(f, "sent"),
            ReminderStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Why a check did not send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No record, or the record belongs to another token.
    StateMissingOrTokenMismatch,
    /// The reminder was cancelled.
    StateCleared,
    /// The reminder was already delivered.
    AlreadySent,
}

impl SkipReason {
    /// Returns the stable reason string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::StateMissingOrTokenMismatch => "state-missing-or-token-mismatch",
            SkipReason::StateCleared => "state-cleared",
            SkipReason::AlreadySent => "already-sent",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The reminder email was sent.
    Sent,
    /// Nothing was sent.
    Skipped(SkipReason),
}

/// Descriptive fields pulled out of a notification payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationDetails {
    /// Notification type.
    pub kind: Option<String>,
    /// Title.
    pub title: Option<String>,
    /// Message.
    pub message: Option<String>,
    /// Session identifier.
    pub session_id: Option<String>,
}

/// Where to look for a field in the payload.
#[derive(Debug, Clone, Copy)]
enum FieldRule {
    /// Inside the nested `notification` object.
    Nested(&'static str),
    /// At the top level.
    TopLevel(&'static str),
}

const KIND_RULES: &[FieldRule] = &[FieldRule::Nested("type"), FieldRule::TopLevel("type")];
const TITLE_RULES: &[FieldRule] = &[FieldRule::Nested("title"), FieldRule::TopLevel("title")];
const MESSAGE_RULES: &[FieldRule] = &[FieldRule::Nested("message"), FieldRule::TopLevel("message")];
const SESSION_RULES: &[FieldRule] = &[
    FieldRule::TopLevel("session_id"),
    FieldRule::TopLevel("sessionId"),
    FieldRule::Nested("session_id"),
    FieldRule::Nested("sessionId"),
];

/// Loosely shaped notification payload read from the hook's stdin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPayload {
    raw: Value,
}

impl NotificationPayload {
    /// Parses a payload; empty or malformed input becomes an empty payload.
    pub fn parse(input: &str) -> Self {
        if input.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str(input) {
            Ok(raw) => Self { raw },
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparsable notification payload");
                Self::default()
            }
        }
    }

    /// Wraps an already parsed value.
    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    /// Applies the per-field rule lists.
    pub fn extract(&self) -> NotificationDetails {
        NotificationDetails {
            kind: self.first_match(KIND_RULES),
            title: self.first_match(TITLE_RULES),
            message: self.first_match(MESSAGE_RULES),
            session_id: self.first_match(SESSION_RULES),
        }
    }

    fn first_match(&self, rules: &[FieldRule]) -> Option<String> {
        rules.iter().find_map(|rule| {
            let value = match rule {
                FieldRule::Nested(key) => self.raw.get("notification")?.get(key)?,
                FieldRule::TopLevel(key) => self.raw.get(key)?,
            };
            match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        })
    }
}

/// Email address with optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: String,
}

impl Address {
    /// Creates an address, validating the email part.
    pub fn new(email: impl Into<String>) -> ReminderResult<Self> {
        let email = email.into();
        Self::validate_email(&email)?;
        Ok(Self { name: None, email })
    }

    /// Parses `Name <email>` or a bare address.
    pub fn parse(s: &str) -> ReminderResult<Self> {
        let s = s.trim();

        if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
            if start < end {
                let name = s[..start].trim().trim_matches('"').trim();
                let mut address = Self::new(s[start + 1..end].trim())?;
                address.name = Some(name.to_string()).filter(|n| !n.is_empty());
                return Ok(address);
            }
        }

        Self::new(s)
    }

    /// Parses a comma-separated header value into addresses.
    pub fn parse_list(s: &str) -> ReminderResult<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    fn validate_email(email: &str) -> ReminderResult<()> {
        let invalid = |reason: &str| {
            Err(ReminderError::message_error(
                ReminderErrorKind::InvalidRecipientAddress,
                format!("{}: {:?}", reason, email),
            ))
        };

        if email.is_empty() {
            return invalid("Email address cannot be empty");
        }
        if email.len() > 254 {
            return invalid("Email address too long");
        }
        if email.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return invalid("Email address cannot contain whitespace or control characters");
        }

        match email.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && local.len() <= 64 && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(())
            }
            _ => invalid("Email address must look like local@domain"),
        }
    }

    /// Formats the address for MAIL FROM / RCPT TO.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => write!(f, "{}", self.email),
        }
    }
}

/// Outgoing plain-text email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// `From` header value.
    pub from: String,
    /// `To` header value.
    pub to: String,
    /// Subject.
    pub subject: String,
    /// Plain text body, lines separated by `\n`.
    pub text: String,
    /// Envelope sender.
    pub envelope_from: Address,
    /// Envelope recipients.
    pub envelope_to: Vec<Address>,
}

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Message-ID that was sent.
    pub message_id: String,
    /// Recipients the server accepted.
    pub accepted: Vec<Address>,
    /// Recipients the server rejected.
    pub rejected: Vec<Address>,
    /// Final server reply.
    pub response: String,
}
