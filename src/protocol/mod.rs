//! SMTP wire vocabulary.
//!
//! Just enough of RFC 5321 to submit one message: the client commands, reply
//! parsing, and the EHLO extensions that decide TLS and AUTH.

use std::collections::BTreeSet;
use std::fmt;

use crate::auth::Mechanism;
use crate::errors::{ReminderError, ReminderResult};

/// Reply codes the session checks for explicitly.
pub mod codes {
    /// `220` greeting.
    pub const READY: u16 = 220;
    /// `235` authentication accepted.
    pub const AUTH_OK: u16 = 235;
    /// `334` server challenge, send the next SASL line.
    pub const AUTH_CHALLENGE: u16 = 334;
    /// `354` send the message, end with `<CRLF>.<CRLF>`.
    pub const DATA_READY: u16 = 354;
}

/// A client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// `EHLO <client id>`.
    Ehlo(String),
    /// `HELO <client id>`, for servers without ESMTP.
    Helo(String),
    /// `STARTTLS`.
    StartTls,
    /// `AUTH <mechanism> [initial response]`.
    Auth(Mechanism, Option<String>),
    /// `MAIL FROM:<path> [SIZE=n]`.
    MailFrom(String, Option<usize>),
    /// `RCPT TO:<path>`.
    RcptTo(String),
    /// `DATA`.
    Data,
    /// `RSET`.
    Rset,
    /// `QUIT`.
    Quit,
}

impl SmtpCommand {
    /// Wire form without the trailing CRLF.
    pub fn line(&self) -> String {
        match self {
            SmtpCommand::Ehlo(id) => format!("EHLO {}", id),
            SmtpCommand::Helo(id) => format!("HELO {}", id),
            SmtpCommand::StartTls => "STARTTLS".into(),
            SmtpCommand::Auth(mechanism, None) => format!("AUTH {}", mechanism),
            SmtpCommand::Auth(mechanism, Some(initial)) => format!("AUTH {} {}", mechanism, initial),
            SmtpCommand::MailFrom(path, None) => format!("MAIL FROM:{}", path),
            SmtpCommand::MailFrom(path, Some(size)) => format!("MAIL FROM:{} SIZE={}", path, size),
            SmtpCommand::RcptTo(path) => format!("RCPT TO:{}", path),
            SmtpCommand::Data => "DATA".into(),
            SmtpCommand::Rset => "RSET".into(),
            SmtpCommand::Quit => "QUIT".into(),
        }
    }
}

/// Log form; SASL payloads are masked.
impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpCommand::Auth(mechanism, Some(_)) => write!(f, "AUTH {} ***", mechanism),
            other => f.write_str(&other.line()),
        }
    }
}

/// A complete, possibly multiline, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    /// Three-digit reply code.
    pub code: u16,
    /// Text of each line, code and separator stripped.
    pub lines: Vec<String>,
}

impl SmtpReply {
    /// Builds a reply from raw lines such as `250-first` / `250 last`.
    pub fn from_lines(raw: &[String]) -> ReminderResult<Self> {
        let (first, rest) = raw
            .split_first()
            .ok_or_else(|| ReminderError::protocol("Empty reply"))?;

        let code = reply_code(first)?;
        let mut lines = vec![reply_text(first)];
        for line in rest {
            if reply_code(line)? != code {
                return Err(ReminderError::protocol(format!(
                    "Reply code changed mid-reply: {}",
                    line
                )));
            }
            lines.push(reply_text(line));
        }

        Ok(Self { code, lines })
    }

    /// True for 2xx replies.
    pub fn is_positive(&self) -> bool {
        self.code / 100 == 2
    }

    /// First line of text.
    pub fn text(&self) -> &str {
        self.lines.first().map_or("", String::as_str)
    }

    /// All lines joined with newlines.
    pub fn joined(&self) -> String {
        self.lines.join("\n")
    }

    /// The error this reply represents.
    pub fn error(&self) -> ReminderError {
        ReminderError::from_smtp_response(self.code, self.joined())
    }
}

impl fmt::Display for SmtpReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

fn reply_code(line: &str) -> ReminderResult<u16> {
    line.get(..3)
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| ReminderError::protocol(format!("Malformed reply line: {:?}", line)))
}

fn reply_text(line: &str) -> String {
    line.get(4..).unwrap_or_default().to_string()
}

/// Service extensions announced in the EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    /// `SIZE` limit, when announced with a non-zero value.
    pub max_size: Option<usize>,
    /// `AUTH` mechanisms this client understands, in preference order.
    pub mechanisms: BTreeSet<Mechanism>,
    /// `STARTTLS` offered.
    pub starttls: bool,
}

impl Extensions {
    /// Reads the extension lines; the first line is the server greeting.
    ///
    /// The pre-RFC `AUTH=LOGIN` spelling is accepted alongside `AUTH LOGIN`.
    pub fn from_ehlo(reply: &SmtpReply) -> Self {
        let mut extensions = Self::default();

        for line in reply.lines.iter().skip(1) {
            let line = line.trim().to_ascii_uppercase();
            let (keyword, params) = line
                .split_once(|c: char| c == ' ' || c == '=')
                .unwrap_or((line.as_str(), ""));

            match keyword {
                "SIZE" => extensions.max_size = params.trim().parse().ok().filter(|n| *n > 0),
                "AUTH" => extensions
                    .mechanisms
                    .extend(params.split_whitespace().filter_map(Mechanism::from_keyword)),
                "STARTTLS" => extensions.starttls = true,
                _ => {}
            }
        }

        extensions
    }

    /// Most preferred advertised mechanism, if any.
    pub fn preferred_mechanism(&self) -> Option<Mechanism> {
        Mechanism::preferred(self.mechanisms.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_command_lines() {
        assert_eq!(SmtpCommand::Helo("box".into()).line(), "HELO box");
        assert_eq!(
            SmtpCommand::MailFrom("<bot@example.com>".into(), Some(2048)).line(),
            "MAIL FROM:<bot@example.com> SIZE=2048"
        );
        assert_eq!(SmtpCommand::RcptTo("<a@example.com>".into()).line(), "RCPT TO:<a@example.com>");
        assert_eq!(SmtpCommand::Auth(Mechanism::Login, None).line(), "AUTH LOGIN");
    }

    #[test]
    fn test_auth_payload_masked_in_logs() {
        let command = SmtpCommand::Auth(Mechanism::Plain, Some("AGJvdABodW50ZXIy".into()));
        assert_eq!(command.to_string(), "AUTH PLAIN ***");
        assert_eq!(command.line(), "AUTH PLAIN AGJvdABodW50ZXIy");
    }

    #[test]
    fn test_multiline_reply() {
        let reply = SmtpReply::from_lines(&lines(&["250-mx.example.net", "250-PIPELINING", "250 8BITMIME"])).unwrap();
        assert_eq!(reply.code, 250);
        assert!(reply.is_positive());
        assert_eq!(reply.text(), "mx.example.net");
        assert_eq!(reply.joined(), "mx.example.net\nPIPELINING\n8BITMIME");
    }

    #[test]
    fn test_bare_code_reply() {
        let reply = SmtpReply::from_lines(&lines(&["354"])).unwrap();
        assert_eq!(reply.code, codes::DATA_READY);
        assert_eq!(reply.text(), "");
    }

    #[test]
    fn test_malformed_replies() {
        assert!(SmtpReply::from_lines(&[]).is_err());
        assert!(SmtpReply::from_lines(&lines(&["OK then"])).is_err());
        assert!(SmtpReply::from_lines(&lines(&["250-one", "550 two"])).is_err());
    }

    #[test]
    fn test_negative_reply_error() {
        let reply = SmtpReply::from_lines(&lines(&["535 5.7.8 Bad credentials"])).unwrap();
        assert!(!reply.is_positive());
        assert_eq!(reply.error().smtp_code(), Some(535));
    }

    #[test]
    fn test_extensions() {
        let reply = SmtpReply::from_lines(&lines(&[
            "250-mx.example.net greets you",
            "250-SIZE 35882577",
            "250-AUTH LOGIN PLAIN XOAUTH2",
            "250-STARTTLS",
            "250 SMTPUTF8",
        ]))
        .unwrap();

        let extensions = Extensions::from_ehlo(&reply);
        assert_eq!(extensions.max_size, Some(35882577));
        assert!(extensions.starttls);
        assert_eq!(extensions.mechanisms.len(), 2);
        assert_eq!(extensions.preferred_mechanism(), Some(Mechanism::Plain));
    }

    #[test]
    fn test_legacy_auth_and_empty_size() {
        let reply = SmtpReply::from_lines(&lines(&["250-mx", "250-AUTH=CRAM-MD5", "250 SIZE"])).unwrap();
        let extensions = Extensions::from_ehlo(&reply);
        assert_eq!(extensions.preferred_mechanism(), Some(Mechanism::CramMd5));
        assert_eq!(extensions.max_size, None);
        assert!(!extensions.starttls);
    }
}
