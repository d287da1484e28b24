//! Outgoing MIME message construction.
//!
//! Builds the RFC 5322 header block and HTML body for a notification email,
//! including the RFC 2047 encoded subject and a globally-unique Message-ID,
//! and prepares the dot-stuffed DATA payload.
//!
//! The HTML body is carried verbatim: templated content is operator-authored,
//! not end-user-authored, so no escaping is applied here. That trust boundary
//! is the caller's to uphold.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::errors::{NotifyError, NotifyResult};

/// Separator used to join multiple recipients in the To header. The
/// transport splits on the same character.
pub const RECIPIENT_SEPARATOR: char = ';';

/// An ephemeral outgoing email. Created per send, never persisted.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Generated Message-ID, angle brackets included.
    pub message_id: String,
    /// Header lines in wire order.
    pub headers: Vec<(String, String)>,
    /// HTML body, carried verbatim.
    pub body: String,
}

impl OutgoingMessage {
    /// Serializes headers and body to the RFC 5322 wire form (CRLF line
    /// endings, blank line between headers and body).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 256);
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(self.body.as_bytes());
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Returns the message prepared for the DATA phase: dot-stuffed and
    /// terminated with `<CRLF>.<CRLF>`.
    pub fn data_bytes(&self) -> Vec<u8> {
        prepare_data_content(&self.to_bytes())
    }
}

/// Builds an outgoing message.
///
/// The subject is always RFC 2047 encoded so non-ASCII subjects survive any
/// relay; recipients are joined with `;` in the To header; the Message-ID
/// domain is taken from the sender address, failing with
/// [`NotifyError::InvalidSender`] when it has no `@`.
pub fn build(
    subject: &str,
    from_display_name: &str,
    from_address: &str,
    to_addresses: &[String],
    html_body: &str,
) -> NotifyResult<OutgoingMessage> {
    let message_id = generate_message_id(from_address)?;

    let headers = vec![
        (
            "To".to_string(),
            to_addresses.join(&RECIPIENT_SEPARATOR.to_string()),
        ),
        (
            "From".to_string(),
            format!("{}<{}>", from_display_name, from_address),
        ),
        ("Subject".to_string(), encode_subject(subject)),
        (
            "Date".to_string(),
            Local::now().format("%a, %d %b %Y %H:%M:%S %z").to_string(),
        ),
        ("Message-ID".to_string(), message_id.clone()),
        (
            "Content-Type".to_string(),
            "text/html; charset=UTF-8".to_string(),
        ),
    ];

    Ok(OutgoingMessage {
        message_id,
        headers,
        body: html_body.to_string(),
    })
}

/// Splits a `;`-joined destination string into individual recipients,
/// dropping empty segments.
pub fn split_recipients(joined: &str) -> Vec<String> {
    joined
        .split(RECIPIENT_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Encodes a subject as an RFC 2047 encoded-word (UTF-8, base64).
fn encode_subject(subject: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64.encode(subject.as_bytes()))
}

/// Generates `<{nanosecond-timestamp}.{12-char-random-alnum}@{domain}>`
/// where the domain is the part of the sender address after the last `@`.
fn generate_message_id(from_address: &str) -> NotifyResult<String> {
    let domain = from_address
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
        .ok_or_else(|| NotifyError::InvalidSender(from_address.to_string()))?;

    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();

    Ok(format!("<{}.{}@{}>", nanos, suffix, domain))
}

/// Dot-stuffs the encoded message and appends the `<CRLF>.<CRLF>` DATA
/// terminator.
fn prepare_data_content(encoded: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded.len() + 8);
    let mut at_line_start = true;

    for &byte in encoded {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }

    if !out.ends_with(b"\r\n") {
        if out.ends_with(b"\n") {
            out.pop();
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipients(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_header_layout() {
        let msg = build(
            "Quota warning",
            "System",
            "bot@example.com",
            &recipients(&["a@x.com", "b@y.com"]),
            "<p>low quota</p>",
        )
        .unwrap();

        let names: Vec<&str> = msg.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            ["To", "From", "Subject", "Date", "Message-ID", "Content-Type"]
        );

        let get = |name: &str| {
            msg.headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("To"), "a@x.com;b@y.com");
        assert_eq!(get("From"), "System<bot@example.com>");
        assert!(get("Subject").starts_with("=?UTF-8?B?"));
        assert_eq!(get("Content-Type"), "text/html; charset=UTF-8");
        assert_eq!(msg.body, "<p>low quota</p>");
    }

    #[test]
    fn test_subject_always_encoded() {
        let msg = build(
            "plain ascii",
            "System",
            "bot@example.com",
            &recipients(&["a@x.com"]),
            "",
        )
        .unwrap();
        let subject = &msg.headers[2].1;
        let encoded = subject
            .strip_prefix("=?UTF-8?B?")
            .and_then(|s| s.strip_suffix("?="))
            .unwrap();
        assert_eq!(BASE64.decode(encoded).unwrap(), b"plain ascii");
    }

    #[test]
    fn test_invalid_sender() {
        let err = build("s", "System", "no-at-sign", &recipients(&["a@x.com"]), "").unwrap_err();
        assert!(matches!(err, NotifyError::InvalidSender(_)));

        let err = build("s", "System", "trailing@", &recipients(&["a@x.com"]), "").unwrap_err();
        assert!(matches!(err, NotifyError::InvalidSender(_)));
    }

    #[test]
    fn test_message_id_domain_after_last_at() {
        let msg = build(
            "s",
            "System",
            "odd@name@relay.example.net",
            &recipients(&["a@x.com"]),
            "",
        )
        .unwrap();
        assert!(msg.message_id.starts_with('<'));
        assert!(msg.message_id.ends_with("@relay.example.net>"));
    }

    #[test]
    fn test_message_id_unique_headers_stable() {
        let to = recipients(&["a@x.com"]);
        let first = build("s", "System", "bot@example.com", &to, "body").unwrap();
        let second = build("s", "System", "bot@example.com", &to, "body").unwrap();
        assert_ne!(first.message_id, second.message_id);
        // Everything except Date and Message-ID is identical.
        for ((name_a, value_a), (name_b, value_b)) in
            first.headers.iter().zip(second.headers.iter())
        {
            assert_eq!(name_a, name_b);
            if name_a != "Message-ID" && name_a != "Date" {
                assert_eq!(value_a, value_b);
            }
        }
    }

    #[test]
    fn test_to_bytes_crlf_framing() {
        let msg = build(
            "s",
            "System",
            "bot@example.com",
            &recipients(&["a@x.com"]),
            "<p>hi</p>",
        )
        .unwrap();
        let wire = String::from_utf8(msg.to_bytes()).unwrap();
        assert!(wire.contains("\r\n\r\n<p>hi</p>\r\n"));
        assert!(wire.starts_with("To: a@x.com\r\n"));
    }

    #[test]
    fn test_dot_stuffing_and_terminator() {
        let stuffed = prepare_data_content(b"Hello\r\n.World\r\n..Test\r\n");
        let text = String::from_utf8(stuffed).unwrap();
        assert!(text.contains("\r\n..World"));
        assert!(text.contains("\r\n...Test"));
        assert!(text.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn test_split_recipients() {
        assert_eq!(
            split_recipients("a@x.com;b@y.com"),
            vec!["a@x.com".to_string(), "b@y.com".to_string()]
        );
        assert_eq!(split_recipients("a@x.com;"), vec!["a@x.com".to_string()]);
        assert!(split_recipients("").is_empty());
    }
}
