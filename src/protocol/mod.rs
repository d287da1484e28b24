//! SMTP wire protocol: the commands this crate sends and the reply parser.
//!
//! Only the subset of RFC 5321 the notification transport needs — EHLO,
//! AUTH, the envelope exchange, DATA, and QUIT.

use std::fmt;

use crate::errors::{NotifyError, NotifyResult};

/// SMTP commands issued by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with the client's hostname.
    Ehlo(String),
    /// AUTH with an optional initial response.
    Auth {
        /// Mechanism name (PLAIN, LOGIN).
        mechanism: &'static str,
        /// Initial response, sent inline for PLAIN.
        initial_response: Option<String>,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Sender address.
        address: String,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address.
        address: String,
    },
    /// DATA command.
    Data,
    /// QUIT command.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for the wire (without CRLF).
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(hostname) => format!("EHLO {}", hostname),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            SmtpCommand::MailFrom { address } => format!("MAIL FROM:<{}>", address),
            SmtpCommand::RcptTo { address } => format!("RCPT TO:<{}>", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Returns the command verb, safe for logging (no credentials).
    pub fn name(&self) -> &'static str {
        match self {
            SmtpCommand::Ehlo(_) => "EHLO",
            SmtpCommand::Auth { .. } => "AUTH",
            SmtpCommand::MailFrom { .. } => "MAIL FROM",
            SmtpCommand::RcptTo { .. } => "RCPT TO",
            SmtpCommand::Data => "DATA",
            SmtpCommand::Quit => "QUIT",
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A parsed server reply.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Reply code (e.g. 250, 354, 550).
    pub code: u16,
    /// Reply text lines, code stripped.
    pub message: Vec<String>,
}

impl SmtpResponse {
    /// Creates a single-line response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: vec![message.into()],
        }
    }

    /// Parses a reply from raw lines (continuation hyphens already consumed
    /// by the reader).
    pub fn parse(lines: &[String]) -> NotifyResult<Self> {
        if lines.is_empty() {
            return Err(NotifyError::transmit("empty server response"));
        }

        let mut message = Vec::with_capacity(lines.len());
        let mut code = 0u16;

        for (i, line) in lines.iter().enumerate() {
            // get(..3) instead of a byte slice: a line starting with a
            // multibyte scalar must parse-error, not panic mid-character.
            let parsed: u16 = line
                .get(..3)
                .and_then(|code| code.parse().ok())
                .ok_or_else(|| {
                    NotifyError::transmit(format!("invalid reply code in {line:?}"))
                })?;
            if i == 0 {
                code = parsed;
            } else if parsed != code {
                return Err(NotifyError::transmit(
                    "inconsistent reply codes in multiline response",
                ));
            }
            message.push(line.get(4..).unwrap_or("").to_string());
        }

        Ok(Self { code, message })
    }

    /// Returns true for a 2xx reply.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true for a 3xx intermediate reply (354, 334).
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns the first reply line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(String::as_str).unwrap_or("")
    }

    /// Returns all reply lines joined.
    pub fn full_message(&self) -> String {
        self.message.join(" / ")
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// Reply codes the transport checks for.
pub mod codes {
    /// Service ready (greeting).
    pub const SERVICE_READY: u16 = 220;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// AUTH continuation prompt.
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
}
