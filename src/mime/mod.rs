//! Message rendering.
//!
//! Reminders are a single `text/plain; charset=utf-8` part. Header values that
//! are not plain ASCII become RFC 2047 encoded words; the body is
//! quoted-printable so any UTF-8 survives 7-bit relays.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use uuid::Uuid;

use crate::errors::{ReminderError, ReminderErrorKind, ReminderResult};
use crate::types::Email;

/// Header lines are folded before this width.
const MAX_LINE: usize = 78;

/// Raw bytes per encoded word; keeps each word within 75 characters.
const ENCODED_WORD_BYTES: usize = 45;

/// A fresh Message-ID for `domain`, without angle brackets.
pub fn message_id(domain: &str) -> String {
    format!("{}@{}", Uuid::new_v4().simple(), domain)
}

/// Renders `email` as an RFC 5322 message with CRLF line endings.
///
/// Fails with [`ReminderErrorKind::InvalidHeader`] if a header value contains
/// a line break.
pub fn render(email: &Email, message_id: &str, date: DateTime<Utc>) -> ReminderResult<Vec<u8>> {
    let headers = [
        ("Date", Cow::Owned(date.to_rfc2822())),
        ("From", address_list(&email.from)),
        ("To", address_list(&email.to)),
        ("Subject", encoded_words(&email.subject)),
        ("Message-ID", Cow::Owned(format!("<{}>", message_id))),
        ("MIME-Version", Cow::Borrowed("1.0")),
        ("Content-Type", Cow::Borrowed("text/plain; charset=utf-8")),
        ("Content-Transfer-Encoding", Cow::Borrowed("quoted-printable")),
    ];

    let mut message = Vec::with_capacity(512 + email.text.len());
    for (name, value) in &headers {
        if value.contains(['\r', '\n']) {
            return Err(ReminderError::message_error(
                ReminderErrorKind::InvalidHeader,
                format!("{} header contains a line break", name),
            ));
        }
        message.extend_from_slice(fold(&format!("{}: {}", name, value)).as_bytes());
        message.extend_from_slice(b"\r\n");
    }
    message.extend_from_slice(b"\r\n");

    let body = email.text.replace("\r\n", "\n").replace('\n', "\r\n");
    message.extend_from_slice(&quoted_printable::encode(body.as_bytes()));
    Ok(message)
}

/// DATA payload: leading dots doubled, CRLF terminated, then `.` on its own line.
pub fn data_payload(message: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(message.len() + 8);
    for line in message.split_inclusive(|&b| b == b'\n') {
        if line.first() == Some(&b'.') {
            payload.push(b'.');
        }
        payload.extend_from_slice(line);
    }

    if !payload.ends_with(b"\r\n") {
        if payload.last() == Some(&b'\n') {
            payload.pop();
        }
        payload.extend_from_slice(b"\r\n");
    }
    payload.extend_from_slice(b".\r\n");
    payload
}

fn is_plain(value: &str) -> bool {
    value.bytes().all(|b| b == b'\t' || (b' '..=b'~').contains(&b))
}

/// Unstructured text, split into base64 encoded words when needed.
fn encoded_words(value: &str) -> Cow<'_, str> {
    if is_plain(value) || value.contains(['\r', '\n']) {
        return Cow::Borrowed(value);
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(&chunk)));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?UTF-8?B?{}?=", BASE64.encode(&chunk)));
    }
    Cow::Owned(words.join(" "))
}

/// Encodes only the display names of a comma separated mailbox list.
fn address_list(value: &str) -> Cow<'_, str> {
    if is_plain(value) {
        return Cow::Borrowed(value);
    }

    let mailboxes: Vec<String> = value
        .split(',')
        .map(|mailbox| match mailbox.trim().rsplit_once('<') {
            Some((name, addr)) if !is_plain(name) => {
                let name = name.trim().trim_matches('"');
                format!("{} <{}", encoded_words(name), addr)
            }
            _ => mailbox.trim().to_string(),
        })
        .collect();
    Cow::Owned(mailboxes.join(", "))
}

/// Folds at spaces; continuation lines start with the space they broke on.
fn fold(line: &str) -> String {
    let mut folded = String::with_capacity(line.len() + 8);
    let mut width = 0;

    for (i, word) in line.split(' ').enumerate() {
        if i > 0 {
            if width + 1 + word.len() > MAX_LINE {
                folded.push_str("\r\n");
                width = 0;
            }
            folded.push(' ');
            width += 1;
        }
        folded.push_str(word);
        width += word.len();
    }
    folded
}
