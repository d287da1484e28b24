//! Scripted test doubles for the transport and router seams.
//!
//! These are plain in-memory fakes: a [`MockConnection`] replays a scripted
//! reply sequence and records everything written to it, and the recording
//! collaborators capture what the router asked them to do. They are compiled
//! into the library so downstream crates can use them in their own tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{NotifyError, NotifyResult};
use crate::message::OutgoingMessage;
use crate::notify::{NotificationLimiter, NotifyKind, WebhookNotifier, WebhookPayload};
use crate::protocol::{SmtpCommand, SmtpResponse};
use crate::transport::{EmailDeliverer, SmtpConnection};

/// Shorthand for building a single-line scripted reply.
pub fn response(code: u16, message: &str) -> SmtpResponse {
    SmtpResponse::new(code, message)
}

/// An in-memory SMTP connection that replays scripted replies.
///
/// Replies are consumed in order; once the script runs out, every exchange
/// gets `250 OK`. Commands, continuation lines, and payloads are recorded
/// for assertions.
#[derive(Debug, Default)]
pub struct MockConnection {
    responses: VecDeque<SmtpResponse>,
    /// Wire form of every command sent.
    pub commands: Vec<String>,
    /// Continuation lines sent (LOGIN base64 exchanges).
    pub lines: Vec<String>,
    /// DATA payloads sent.
    pub payloads: Vec<Vec<u8>>,
    /// Whether the connection was closed.
    pub closed: bool,
}

impl MockConnection {
    /// Creates a connection that answers `250 OK` to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connection that replays the given replies in order.
    pub fn script(responses: Vec<SmtpResponse>) -> Self {
        Self {
            responses: responses.into(),
            ..Self::default()
        }
    }

    fn next_response(&mut self) -> SmtpResponse {
        self.responses
            .pop_front()
            .unwrap_or_else(|| SmtpResponse::new(250, "OK"))
    }
}

#[async_trait]
impl SmtpConnection for MockConnection {
    async fn command(&mut self, command: &SmtpCommand) -> NotifyResult<SmtpResponse> {
        self.commands.push(command.to_smtp_string());
        Ok(self.next_response())
    }

    async fn send_line(&mut self, line: &str) -> NotifyResult<SmtpResponse> {
        self.lines.push(line.to_string());
        Ok(self.next_response())
    }

    async fn send_payload(&mut self, payload: &[u8]) -> NotifyResult<SmtpResponse> {
        self.payloads.push(payload.to_vec());
        Ok(self.next_response())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// A delivered email captured by [`RecordingMailer`].
#[derive(Debug, Clone)]
pub struct SentEmail {
    /// Message-ID of the built message.
    pub message_id: String,
    /// Recipient list as passed to the deliverer.
    pub recipients: Vec<String>,
    /// HTML body of the message.
    pub body: String,
}

/// An [`EmailDeliverer`] that records sends instead of talking to a server.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    /// Every message handed to the deliverer.
    pub sent: Mutex<Vec<SentEmail>>,
    /// One-shot failure returned on the next send.
    pub fail_next: Mutex<Option<NotifyError>>,
}

impl RecordingMailer {
    /// Creates a deliverer that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a failure for the next send.
    pub fn fail_with(self, err: NotifyError) -> Self {
        *self.fail_next.lock().unwrap() = Some(err);
        self
    }

    /// Number of messages sent so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailDeliverer for RecordingMailer {
    async fn send(&self, message: &OutgoingMessage, recipients: &[String]) -> NotifyResult<()> {
        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(SentEmail {
            message_id: message.message_id.clone(),
            recipients: recipients.to_vec(),
            body: message.body.clone(),
        });
        Ok(())
    }
}

/// A webhook delivery captured by [`RecordingWebhook`].
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// Destination URL.
    pub url: String,
    /// Signing secret, when configured.
    pub secret: Option<String>,
    /// The payload handed to the collaborator.
    pub payload: WebhookPayload,
}

/// A [`WebhookNotifier`] that records deliveries.
#[derive(Debug, Default)]
pub struct RecordingWebhook {
    /// Every delivery handed to the collaborator.
    pub deliveries: Mutex<Vec<WebhookDelivery>>,
    /// One-shot failure returned on the next delivery.
    pub fail_next: Mutex<Option<NotifyError>>,
}

impl RecordingWebhook {
    /// Creates a notifier that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of deliveries so far.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookNotifier for RecordingWebhook {
    async fn deliver(
        &self,
        url: &str,
        secret: Option<&str>,
        payload: &WebhookPayload,
    ) -> NotifyResult<()> {
        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err);
        }
        self.deliveries.lock().unwrap().push(WebhookDelivery {
            url: url.to_string(),
            secret: secret.map(str::to_string),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Fixed outcome for a [`StaticLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterScript {
    /// Every check passes.
    Allow,
    /// Every check is refused.
    Deny,
    /// Every check fails with a collaborator error.
    Fail,
}

/// A [`NotificationLimiter`] with a fixed answer that records its calls.
#[derive(Debug)]
pub struct StaticLimiter {
    script: LimiterScript,
    /// Every (user, kind) pair checked.
    pub calls: Mutex<Vec<(i64, NotifyKind)>>,
}

impl StaticLimiter {
    /// Creates a limiter with the given fixed outcome.
    pub fn new(script: LimiterScript) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of checks performed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationLimiter for StaticLimiter {
    async fn allow(&self, user_id: i64, kind: NotifyKind) -> NotifyResult<bool> {
        self.calls.lock().unwrap().push((user_id, kind));
        match self.script {
            LimiterScript::Allow => Ok(true),
            LimiterScript::Deny => Ok(false),
            LimiterScript::Fail => Err(NotifyError::Limiter {
                user_id,
                reason: "storage unavailable".to_string(),
            }),
        }
    }
}
