//! Error types for the notification subsystem.
//!
//! One variant per failure class: configuration gaps fail fast before any
//! I/O, protocol-phase failures name the phase (and the offending address for
//! envelope rejections), and rate-limit refusals are soft errors that callers
//! are expected to tolerate.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors surfaced by the router and the email transport.
///
/// No component retries internally; every variant propagates unchanged to the
/// caller (except on the root-notification path, which logs and swallows).
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Neither a server host nor an account is configured. Raised before any
    /// network activity.
    #[error("SMTP server is not configured")]
    ConfigMissing,

    /// The sender address has no domain part, so no Message-ID can be formed.
    #[error("sender address {0:?} has no domain part")]
    InvalidSender(String),

    /// DNS, TCP, or TLS failure while establishing the connection, including
    /// an unexpected server greeting.
    #[error("connection to {address} failed: {source}")]
    Connect {
        /// host:port that was dialed.
        address: String,
        /// Underlying I/O cause.
        #[source]
        source: io::Error,
    },

    /// Credentials rejected by the server. Never retried with the same
    /// credentials.
    #[error("authentication rejected by {server}: {response}")]
    Auth {
        /// Server hostname.
        server: String,
        /// Server reply text.
        response: String,
    },

    /// Sender or a specific recipient was rejected during the MAIL FROM /
    /// RCPT TO exchange.
    #[error("address {address} rejected during envelope exchange: {response}")]
    Envelope {
        /// The offending address.
        address: String,
        /// Server reply text.
        response: String,
    },

    /// Failure during or after the DATA phase, or the overall send deadline
    /// expired. The message may have partially reached the server; the send
    /// is treated as failed overall.
    #[error("message transmission failed: {reason}")]
    Transmit {
        /// Human-readable cause.
        reason: String,
    },

    /// The external rate-limit collaborator refused this (user, kind) pair.
    /// Expected during normal operation, not a system fault.
    #[error("notification limit reached for user {user_id} ({kind})")]
    RateLimited {
        /// User the notification was addressed to.
        user_id: i64,
        /// Notification kind that hit the limit.
        kind: &'static str,
    },

    /// The rate-limit collaborator itself failed (storage error etc.).
    #[error("rate limit check for user {user_id} failed: {reason}")]
    Limiter {
        /// User the check was for.
        user_id: i64,
        /// Collaborator-reported cause.
        reason: String,
    },

    /// The webhook collaborator reported a delivery failure.
    #[error("webhook delivery to {url} failed: {reason}")]
    Webhook {
        /// Destination URL.
        url: String,
        /// Collaborator-reported cause.
        reason: String,
    },
}

impl NotifyError {
    /// Creates a connection error from an I/O cause.
    pub fn connect(address: impl Into<String>, source: io::Error) -> Self {
        Self::Connect {
            address: address.into(),
            source,
        }
    }

    /// Creates a connection error for a dial or handshake deadline expiry.
    pub fn connect_timeout(address: impl Into<String>, elapsed: Duration) -> Self {
        Self::Connect {
            address: address.into(),
            source: io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out after {}", humantime::format_duration(elapsed)),
            ),
        }
    }

    /// Creates a transmission error.
    pub fn transmit(reason: impl Into<String>) -> Self {
        Self::Transmit {
            reason: reason.into(),
        }
    }

    /// Creates a transmission error for an expired per-send deadline.
    pub fn send_deadline(elapsed: Duration) -> Self {
        Self::Transmit {
            reason: format!(
                "send deadline of {} exceeded",
                humantime::format_duration(elapsed)
            ),
        }
    }

    /// Returns true for the soft rate-limit refusal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, NotifyError::RateLimited { .. })
    }

    /// Returns true for errors raised before any network activity.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            NotifyError::ConfigMissing | NotifyError::InvalidSender(_)
        )
    }
}
