//! Error types for the reminder hook.
//!
//! One error type covers configuration, state persistence, background
//! spawning and SMTP delivery failures, classified by [`ReminderErrorKind`].

use std::fmt;
use thiserror::Error;

/// Result type for reminder operations.
pub type ReminderResult<T> = Result<T, ReminderError>;

/// Error kinds categorizing different failure modes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderErrorKind {
    // Configuration errors
    /// Configuration file is missing or unreadable.
    #[error("Configuration missing")]
    ConfigurationMissing,
    /// Configuration is present but invalid or incomplete.
    #[error("Invalid configuration")]
    ConfigurationInvalid,

    // Local errors
    /// Reading or writing the state file failed.
    #[error("State file error")]
    StateIo,
    /// Serializing the reminder record failed.
    #[error("Serialization failed")]
    Serialization,
    /// Spawning the background check process failed.
    #[error("Background spawn failed")]
    SpawnFailed,

    // Connection errors
    /// Connection was refused.
    #[error("Connection refused")]
    ConnectionRefused,
    /// Connection was reset or closed by the server.
    #[error("Connection reset")]
    ConnectionReset,
    /// TLS handshake failed.
    #[error("TLS handshake failed")]
    TlsHandshakeFailed,

    // Authentication errors
    /// Credentials were rejected.
    #[error("Invalid credentials")]
    CredentialsInvalid,
    /// Server requires authentication.
    #[error("Authentication required")]
    AuthenticationRequired,
    /// No usable authentication mechanism.
    #[error("Auth method not supported")]
    AuthMethodNotSupported,

    // Protocol errors
    /// Malformed response from server.
    #[error("Invalid server response")]
    InvalidResponse,
    /// Well-formed but unexpected reply code.
    #[error("Unexpected response")]
    UnexpectedResponse,
    /// Server is shutting down (421).
    #[error("Server shutting down")]
    ServerShutdown,

    // Message errors
    /// Invalid sender address.
    #[error("Invalid sender address")]
    InvalidFromAddress,
    /// Invalid or rejected recipient address.
    #[error("Invalid recipient address")]
    InvalidRecipientAddress,
    /// Invalid header content.
    #[error("Invalid header")]
    InvalidHeader,
    /// Message exceeds the server size limit.
    #[error("Message too large")]
    MessageTooLarge,

    // Timeout errors
    /// Connect timeout.
    #[error("Connect timeout")]
    ConnectTimeout,
    /// Read timeout.
    #[error("Read timeout")]
    ReadTimeout,
    /// Write timeout.
    #[error("Write timeout")]
    WriteTimeout,

    /// Unknown or internal error.
    #[error("Unknown error")]
    Unknown,
}

impl ReminderErrorKind {
    /// Returns true if the failure happened while talking to the mail server.
    pub fn is_delivery(&self) -> bool {
        !matches!(
            self,
            ReminderErrorKind::ConfigurationMissing
                | ReminderErrorKind::ConfigurationInvalid
                | ReminderErrorKind::StateIo
                | ReminderErrorKind::Serialization
                | ReminderErrorKind::SpawnFailed
                | ReminderErrorKind::Unknown
        )
    }
}

/// Reminder error with detailed information.
#[derive(Error, Debug)]
pub struct ReminderError {
    kind: ReminderErrorKind,
    message: String,
    /// SMTP reply code if the error came from the server.
    smtp_code: Option<u16>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ReminderError {
    /// Creates a new error.
    pub fn new(kind: ReminderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ReminderErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    // Convenience constructors

    /// Creates a missing-configuration error.
    pub fn configuration_missing(message: impl Into<String>) -> Self {
        Self::new(ReminderErrorKind::ConfigurationMissing, message)
    }

    /// Creates an invalid-configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ReminderErrorKind::ConfigurationInvalid, message)
    }

    /// Creates a state file error.
    pub fn state_io(message: impl Into<String>) -> Self {
        Self::new(ReminderErrorKind::StateIo, message)
    }

    /// Creates a spawn error.
    pub fn spawn(message: impl Into<String>) -> Self {
        Self::new(ReminderErrorKind::SpawnFailed, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ReminderErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: ReminderErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(ReminderErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ReminderErrorKind::CredentialsInvalid, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ReminderErrorKind::InvalidResponse, message)
    }

    /// Creates a message error.
    pub fn message_error(kind: ReminderErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates an error from an SMTP reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            421 => ReminderErrorKind::ServerShutdown,
            500..=503 => ReminderErrorKind::InvalidResponse,
            504 => ReminderErrorKind::AuthMethodNotSupported,
            530 => ReminderErrorKind::AuthenticationRequired,
            535 => ReminderErrorKind::CredentialsInvalid,
            550 | 551 => ReminderErrorKind::InvalidRecipientAddress,
            552 => ReminderErrorKind::MessageTooLarge,
            553 => ReminderErrorKind::InvalidFromAddress,
            400..=599 => ReminderErrorKind::UnexpectedResponse,
            _ => ReminderErrorKind::Unknown,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for ReminderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        Ok(())
    }
}

impl From<serde_json::Error> for ReminderError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ReminderErrorKind::Serialization, error.to_string()).with_cause(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(421, ReminderErrorKind::ServerShutdown)]
    #[case(451, ReminderErrorKind::UnexpectedResponse)]
    #[case(502, ReminderErrorKind::InvalidResponse)]
    #[case(504, ReminderErrorKind::AuthMethodNotSupported)]
    #[case(535, ReminderErrorKind::CredentialsInvalid)]
    #[case(552, ReminderErrorKind::MessageTooLarge)]
    #[case(553, ReminderErrorKind::InvalidFromAddress)]
    fn test_reply_code_mapping(#[case] code: u16, #[case] expected: ReminderErrorKind) {
        let err = ReminderError::from_smtp_response(code, "server said no");
        assert_eq!(err.kind(), expected);
        assert_eq!(err.smtp_code(), Some(code));
    }

    #[test]
    fn test_error_display_includes_code() {
        let err = ReminderError::from_smtp_response(550, "No such user");
        assert_eq!(
            err.to_string(),
            "Invalid recipient address: No such user (SMTP 550)"
        );

        let err = ReminderError::configuration("missing from.email");
        assert_eq!(err.to_string(), "Invalid configuration: missing from.email");
    }

    #[test]
    fn test_delivery_classification() {
        assert!(ReminderErrorKind::TlsHandshakeFailed.is_delivery());
        assert!(ReminderErrorKind::CredentialsInvalid.is_delivery());
        assert!(!ReminderErrorKind::ConfigurationMissing.is_delivery());
        assert!(!ReminderErrorKind::StateIo.is_delivery());
    }
}
