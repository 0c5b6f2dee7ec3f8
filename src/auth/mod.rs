//! SASL mechanisms for SMTP submission.
//!
//! Only username/password mechanisms are offered: CRAM-MD5 (RFC 2195),
//! PLAIN (RFC 4616) and the legacy LOGIN exchange.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::errors::{ReminderError, ReminderResult};

/// A SASL mechanism.
///
/// Variants are declared from most to least preferred, so the derived
/// ordering ranks them: the smallest advertised mechanism is the one to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mechanism {
    /// Challenge-response; the password never crosses the wire.
    CramMd5,
    /// Single base64 initial response.
    Plain,
    /// Username and password in two base64 round trips.
    Login,
}

impl Mechanism {
    const ALL: [Mechanism; 3] = [Mechanism::CramMd5, Mechanism::Plain, Mechanism::Login];

    /// Keyword used in EHLO and `AUTH`.
    pub const fn keyword(self) -> &'static str {
        match self {
            Mechanism::CramMd5 => "CRAM-MD5",
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
        }
    }

    /// Looks up a mechanism by keyword, ignoring case.
    pub fn from_keyword(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.keyword().eq_ignore_ascii_case(token))
    }

    /// Picks the most preferred mechanism among those advertised.
    pub fn preferred(advertised: impl IntoIterator<Item = Mechanism>) -> Option<Self> {
        advertised.into_iter().min()
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// SMTP login.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// PLAIN initial response: base64 of `\0user\0password`.
    pub fn plain_response(&self) -> String {
        BASE64.encode(format!("\0{}\0{}", self.username, self.password.expose_secret()))
    }

    /// LOGIN answers, username first.
    pub fn login_responses(&self) -> [String; 2] {
        [
            BASE64.encode(&self.username),
            BASE64.encode(self.password.expose_secret()),
        ]
    }

    /// Answers a base64 CRAM-MD5 challenge with `user hex(hmac-md5)`.
    pub fn cram_md5_response(&self, challenge: &str) -> ReminderResult<String> {
        let challenge = BASE64.decode(challenge.trim()).map_err(|e| {
            ReminderError::authentication(format!("Malformed CRAM-MD5 challenge: {}", e))
        })?;

        let mut mac = <Hmac<Md5>>::new_from_slice(self.password.expose_secret().as_bytes())
            .map_err(|e| ReminderError::authentication(format!("HMAC key rejected: {}", e)))?;
        mac.update(&challenge);

        let digest = mac
            .finalize()
            .into_bytes()
            .iter()
            .fold(String::with_capacity(32), |mut hex, byte| {
                hex.push_str(&format!("{:02x}", byte));
                hex
            });
        Ok(BASE64.encode(format!("{} {}", self.username, digest)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(Mechanism::from_keyword("cram-md5"), Some(Mechanism::CramMd5));
        assert_eq!(Mechanism::from_keyword("LOGIN"), Some(Mechanism::Login));
        assert_eq!(Mechanism::from_keyword("XOAUTH2"), None);
    }

    #[test]
    fn test_preference_order() {
        assert_eq!(
            Mechanism::preferred([Mechanism::Login, Mechanism::Plain]),
            Some(Mechanism::Plain)
        );
        assert_eq!(
            Mechanism::preferred([Mechanism::Plain, Mechanism::CramMd5, Mechanism::Login]),
            Some(Mechanism::CramMd5)
        );
        assert_eq!(Mechanism::preferred([]), None);
    }

    #[test]
    fn test_plain_and_login_encoding() {
        let creds = Credentials::new("user", "pass");
        assert_eq!(BASE64.decode(creds.plain_response()).unwrap(), b"\0user\0pass");

        let [user, pass] = creds.login_responses();
        assert_eq!(user, "dXNlcg==");
        assert_eq!(pass, "cGFzcw==");
    }

    #[test]
    fn test_cram_md5_rfc2195_vector() {
        let creds = Credentials::new("tim", "tanstaaftanstaaf");
        let challenge = BASE64.encode("<1896.697170952@postoffice.reston.mci.net>");
        let answer = creds.cram_md5_response(&challenge).unwrap();
        assert_eq!(
            BASE64.decode(answer).unwrap(),
            b"tim b913a602c7eda7a495b4e6e7334d3890"
        );

        assert!(creds.cram_md5_response("!!not base64!!").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("bot", "hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
