//! Configuration for the reminder hook.
//!
//! Covers:
//! - The JSON configuration file (SMTP server, sender, recipients, subject)
//! - Delay resolution for the background check
//! - SMTP transport options derived from the file

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use serde_json::error::Category;
use serde_json::Value;

use crate::auth::Credentials;
use crate::errors::{ReminderError, ReminderResult};

/// Default SMTP port (implicit TLS submission).
pub const DEFAULT_PORT: u16 = 465;

/// Default timeout for connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Name sent with EHLO/HELO.
pub const DEFAULT_CLIENT_ID: &str = "localhost";

/// Default delay before the reminder is sent.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 300.0;

/// Environment variable overriding the configured delay.
pub const TIMEOUT_OVERRIDE_ENV: &str = "EMAIL_REMINDER_TIMEOUT_OVERRIDE_SEC";

/// Default subject line.
pub const DEFAULT_SUBJECT: &str = "Assistant is waiting for your input";

/// Default configuration file name, next to the executable.
pub const DEFAULT_CONFIG_FILE: &str = "email.config.local.json";

/// Default state file name, next to the executable.
pub const DEFAULT_STATE_FILE: &str = "email-reminder.state.json";

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Opportunistic STARTTLS on a plaintext connection.
    StartTls,
    /// Implicit TLS from the first byte (port 465).
    #[default]
    Implicit,
}

/// Recipients as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    /// A single header value, used as-is.
    One(String),
    /// A list of addresses.
    Many(Vec<String>),
}

impl Recipients {
    /// Returns the `To` header value.
    pub fn to_header(&self) -> String {
        match self {
            Recipients::One(value) => value.clone(),
            Recipients::Many(values) => values.join(", "),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Recipients::One(value) => value.trim().is_empty(),
            Recipients::Many(values) => values.is_empty(),
        }
    }
}

/// Sender identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Sender email address.
    pub email: String,
    /// Optional display name.
    pub name: Option<String>,
}

impl Sender {
    /// Formats the sender as `Name <email>` or a bare address.
    pub fn to_header(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// SMTP server settings from the configuration file.
#[derive(Clone)]
pub struct SmtpSettings {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: Option<u16>,
    /// Use implicit TLS; `None` means the default (true).
    pub secure: Option<bool>,
    /// Authentication username.
    pub user: String,
    /// Authentication password.
    pub pass: SecretString,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("user", &self.user)
            .field("pass", &"[REDACTED]")
            .finish()
    }
}

impl SmtpSettings {
    /// Derives transport options: an absent or zero port becomes 465 and TLS
    /// is implicit unless `secure` is explicitly `false`.
    pub fn transport_options(&self) -> SmtpOptions {
        let tls_mode = if self.secure == Some(false) {
            TlsMode::StartTls
        } else {
            TlsMode::Implicit
        };

        SmtpOptions {
            host: self.host.clone(),
            port: self.port.filter(|p| *p != 0).unwrap_or(DEFAULT_PORT),
            tls_mode,
            credentials: Some(Credentials::new(
                self.user.clone(),
                self.pass.expose_secret().clone(),
            )),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

/// Validated reminder configuration.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// SMTP server settings.
    pub smtp: SmtpSettings,
    /// Sender identity.
    pub from: Sender,
    /// Recipients.
    pub to: Recipients,
    /// Subject override.
    pub subject: Option<String>,
    /// Configured delay in seconds.
    pub timeout_seconds: Option<f64>,
}

// Everything optional so that missing fields produce our own messages.
// Optional settings of the wrong type read as absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    smtp: Option<RawSmtp>,
    from: Option<RawSender>,
    to: Option<Recipients>,
    subject: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    timeout_seconds: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSmtp {
    host: Option<String>,
    #[serde(default, deserialize_with = "lenient_port")]
    port: Option<u16>,
    #[serde(default, deserialize_with = "lenient_flag")]
    secure: Option<bool>,
    user: Option<String>,
    pass: Option<SecretString>,
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_f64())
}

/// Accepts `587` and `"587"`.
fn lenient_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
    let port = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(port.and_then(|p| u16::try_from(p).ok()))
}

fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_bool())
}

#[derive(Debug, Default, Deserialize)]
struct RawSender {
    email: Option<String>,
    name: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ReminderConfig {
    /// Loads and validates the configuration file.
    pub fn load(path: &Path) -> ReminderResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReminderError::configuration_missing(format!(
                "configuration file not found: {}",
                path.display()
            ))
            .with_cause(e)
        })?;

        if raw.trim().is_empty() {
            return Err(ReminderError::configuration_missing(format!(
                "configuration file is empty: {}",
                path.display()
            )));
        }

        Self::from_json_str(&raw)
    }

    /// Parses and validates configuration JSON.
    pub fn from_json_str(json: &str) -> ReminderResult<Self> {
        let raw: RawConfig = serde_json::from_str(json).map_err(|e| {
            let message = match e.classify() {
                Category::Data => format!("configuration has a field of the wrong type: {}", e),
                _ => format!("configuration is not valid JSON: {}", e),
            };
            ReminderError::configuration(message).with_cause(e)
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> ReminderResult<Self> {
        let smtp = raw.smtp.unwrap_or_default();
        let (host, user, pass) = match (
            non_empty(smtp.host),
            non_empty(smtp.user),
            smtp.pass.filter(|p| !p.expose_secret().is_empty()),
        ) {
            (Some(host), Some(user), Some(pass)) => (host, user, pass),
            _ => {
                return Err(ReminderError::configuration(
                    "configuration is missing smtp.host / smtp.user / smtp.pass",
                ))
            }
        };

        let from = raw.from.unwrap_or_default();
        let email = non_empty(from.email)
            .ok_or_else(|| ReminderError::configuration("configuration is missing from.email"))?;

        let to = raw
            .to
            .filter(|to| !to.is_empty())
            .ok_or_else(|| ReminderError::configuration("configuration is missing to"))?;

        Ok(Self {
            smtp: SmtpSettings {
                host,
                port: smtp.port,
                secure: smtp.secure,
                user,
                pass,
            },
            from: Sender {
                email,
                name: non_empty(from.name),
            },
            to,
            subject: non_empty(raw.subject),
            timeout_seconds: raw.timeout_seconds,
        })
    }

    /// Returns the subject line.
    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or(DEFAULT_SUBJECT)
    }
}

/// Resolves the reminder delay in seconds.
///
/// Priority: a non-negative numeric override, then the configured value, then
/// [`DEFAULT_TIMEOUT_SECONDS`].
pub fn resolve_timeout_seconds(configured: Option<f64>, override_value: Option<&str>) -> f64 {
    if let Some(raw) = override_value.map(str::trim).filter(|v| !v.is_empty()) {
        match raw.parse::<f64>() {
            Ok(parsed) if parsed.is_finite() && parsed >= 0.0 => return parsed,
            _ => tracing::debug!(value = raw, "Ignoring invalid {}", TIMEOUT_OVERRIDE_ENV),
        }
    }

    match configured {
        Some(seconds) if seconds.is_finite() => seconds.max(0.0),
        Some(_) => 0.0,
        None => DEFAULT_TIMEOUT_SECONDS,
    }
}

/// SMTP transport options.
#[derive(Debug, Clone)]
pub struct SmtpOptions {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// TLS mode.
    pub tls_mode: TlsMode,
    /// Credentials, if authentication is wanted.
    pub credentials: Option<Credentials>,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Per-command timeout.
    pub command_timeout: Duration,
    /// Name announced in EHLO/HELO.
    pub client_id: String,
}

impl SmtpOptions {
    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Locations of the configuration and state files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookPaths {
    /// Configuration file.
    pub config: PathBuf,
    /// State file.
    pub state: PathBuf,
}

impl HookPaths {
    /// Resolves paths, defaulting to files next to the running executable.
    pub fn resolve(config: Option<PathBuf>, state: Option<PathBuf>) -> Self {
        let base = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            config: config.unwrap_or_else(|| base.join(DEFAULT_CONFIG_FILE)),
            state: state.unwrap_or_else(|| base.join(DEFAULT_STATE_FILE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FULL: &str = r#"{
        "smtp": { "host": "smtp.example.com", "port": 587, "secure": false,
                  "user": "bot@example.com", "pass": "hunter2" },
        "from": { "email": "bot@example.com", "name": "Reminder Bot" },
        "to": ["a@example.com", "b@example.com"],
        "subject": "Ping",
        "timeoutSeconds": 120
    }"#;

    #[test]
    fn test_full_config() {
        let config = ReminderConfig::from_json_str(FULL).unwrap();
        assert_eq!(config.smtp.host, "smtp.example.com");
        assert_eq!(config.smtp.port, Some(587));
        assert_eq!(config.from.to_header(), "Reminder Bot <bot@example.com>");
        assert_eq!(config.to.to_header(), "a@example.com, b@example.com");
        assert_eq!(config.subject(), "Ping");
        assert_eq!(config.timeout_seconds, Some(120.0));

        let options = config.smtp.transport_options();
        assert_eq!(options.port, 587);
        assert_eq!(options.tls_mode, TlsMode::StartTls);
        assert_eq!(options.address(), "smtp.example.com:587");
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = ReminderConfig::from_json_str(
            r#"{"smtp":{"host":"h","user":"u","pass":"p"},"from":{"email":"f@x.io"},"to":"t@x.io"}"#,
        )
        .unwrap();
        assert_eq!(config.subject(), DEFAULT_SUBJECT);
        assert_eq!(config.from.to_header(), "f@x.io");
        assert_eq!(config.to.to_header(), "t@x.io");

        let options = config.smtp.transport_options();
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.tls_mode, TlsMode::Implicit);
        assert!(options.credentials.is_some());
    }

    #[rstest]
    #[case(r#"{"from":{"email":"f@x.io"},"to":"t@x.io"}"#, "smtp.host")]
    #[case(r#"{"smtp":{"host":"h","user":"u"},"from":{"email":"f@x.io"},"to":"t@x.io"}"#, "smtp.pass")]
    #[case(r#"{"smtp":{"host":"h","user":"u","pass":"p"},"to":"t@x.io"}"#, "from.email")]
    #[case(r#"{"smtp":{"host":"h","user":"u","pass":"p"},"from":{"email":"f@x.io"}}"#, "missing to")]
    #[case(r#"{"smtp":{"host":"h","user":"u","pass":"p"},"from":{"email":"f@x.io"},"to":[]}"#, "missing to")]
    fn test_missing_required_fields(#[case] json: &str, #[case] expected: &str) {
        let err = ReminderConfig::from_json_str(json).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ReminderErrorKind::ConfigurationInvalid);
        assert!(err.message().contains(expected), "{}", err.message());
    }

    #[rstest]
    #[case("", r#","timeoutSeconds":"120""#, None, 465, TlsMode::Implicit)]
    #[case("", r#","timeoutSeconds":45.5"#, Some(45.5), 465, TlsMode::Implicit)]
    #[case(r#","port":"587""#, "", None, 587, TlsMode::Implicit)]
    #[case(r#","port":0"#, "", None, 465, TlsMode::Implicit)]
    #[case(r#","port":"smtp""#, "", None, 465, TlsMode::Implicit)]
    #[case(r#","secure":"no""#, "", None, 465, TlsMode::Implicit)]
    #[case(r#","secure":false,"port":null"#, "", None, 465, TlsMode::StartTls)]
    fn test_optional_fields_are_lenient(
        #[case] smtp_extra: &str,
        #[case] top_extra: &str,
        #[case] timeout: Option<f64>,
        #[case] port: u16,
        #[case] tls_mode: TlsMode,
    ) {
        let json = format!(
            r#"{{"smtp":{{"host":"h","user":"u","pass":"p"{}}},"from":{{"email":"f@x.io"}},"to":"t@x.io"{}}}"#,
            smtp_extra, top_extra
        );
        let config = ReminderConfig::from_json_str(&json).unwrap();
        assert_eq!(config.timeout_seconds, timeout);

        let options = config.smtp.transport_options();
        assert_eq!(options.port, port);
        assert_eq!(options.tls_mode, tls_mode);
        assert_eq!(options.client_id, DEFAULT_CLIENT_ID);
    }

    #[test]
    fn test_type_and_syntax_errors_are_told_apart() {
        let err = ReminderConfig::from_json_str(r#"{"smtp":"smtp.example.com"}"#).unwrap_err();
        assert!(err.message().contains("wrong type"), "{}", err.message());

        let err = ReminderConfig::from_json_str(r#"{"smtp":"#).unwrap_err();
        assert!(err.message().contains("not valid JSON"), "{}", err.message());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReminderConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ReminderErrorKind::ConfigurationMissing);
    }

    #[test]
    fn test_password_is_redacted() {
        let config = ReminderConfig::from_json_str(FULL).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }

    #[rstest]
    #[case(Some(120.0), Some("45"), 45.0)]
    #[case(None, Some("45"), 45.0)]
    #[case(Some(120.0), None, 120.0)]
    #[case(None, None, 300.0)]
    #[case(Some(120.0), Some(""), 120.0)]
    #[case(Some(120.0), Some("soon"), 120.0)]
    #[case(Some(120.0), Some("-5"), 120.0)]
    #[case(None, Some("0"), 0.0)]
    #[case(None, Some("1.5"), 1.5)]
    #[case(Some(-10.0), None, 0.0)]
    fn test_resolve_timeout_seconds(
        #[case] configured: Option<f64>,
        #[case] override_value: Option<&str>,
        #[case] expected: f64,
    ) {
        assert_eq!(resolve_timeout_seconds(configured, override_value), expected);
    }

    #[test]
    fn test_explicit_paths_win() {
        let paths = HookPaths::resolve(Some("/tmp/c.json".into()), Some("/tmp/s.json".into()));
        assert_eq!(paths.config, PathBuf::from("/tmp/c.json"));
        assert_eq!(paths.state, PathBuf::from("/tmp/s.json"));

        let defaults = HookPaths::resolve(None, None);
        assert!(defaults.config.ends_with(DEFAULT_CONFIG_FILE));
        assert!(defaults.state.ends_with(DEFAULT_STATE_FILE));
    }
}
