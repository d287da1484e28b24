//! Notification routing: kinds, payload templating, per-user channel
//! settings, and the router that fans a notification out to email or a
//! webhook.
//!
//! The router owns no delivery logic of its own. Rate limiting and webhook
//! delivery are external collaborators behind traits; email goes through the
//! [`EmailDeliverer`] seam so the whole path is testable in memory.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SmtpConfig;
use crate::errors::{NotifyError, NotifyResult};
use crate::message;
use crate::transport::EmailDeliverer;

/// Placeholder replaced by positional values when rendering content.
pub const CONTENT_PLACEHOLDER: &str = "{{value}}";

/// What a notification is about. Doubles as the rate-limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    /// A user ran out of quota.
    QuotaExceeded,
    /// A user's balance dropped below the warning threshold.
    BalanceLow,
    /// An upstream channel was disabled or re-enabled.
    ChannelUpdate,
    /// A channel connectivity test finished.
    ChannelTest,
}

impl NotifyKind {
    /// Stable string form, used as the rate-limit key.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::QuotaExceeded => "quota_exceeded",
            NotifyKind::BalanceLow => "balance_low",
            NotifyKind::ChannelUpdate => "channel_update",
            NotifyKind::ChannelTest => "channel_test",
        }
    }
}

impl fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A notification to deliver: a kind, a title, and templated content.
///
/// Content may contain `{{value}}` placeholders; each value fills the first
/// remaining placeholder, left to right. Email receives the rendered text,
/// webhooks receive the raw template plus the values so the receiver can do
/// its own formatting.
#[derive(Debug, Clone)]
pub struct NotifyPayload {
    /// Notification kind.
    pub kind: NotifyKind,
    /// Title (email subject).
    pub title: String,
    /// Content template.
    pub content: String,
    /// Positional placeholder values.
    pub values: Vec<String>,
}

impl NotifyPayload {
    /// Creates a payload with no values.
    pub fn new(kind: NotifyKind, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            content: content.into(),
            values: Vec::new(),
        }
    }

    /// Appends a placeholder value.
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Renders the content, substituting one placeholder per value. Extra
    /// values are dropped; extra placeholders stay literal.
    pub fn rendered_content(&self) -> String {
        let mut rendered = self.content.clone();
        for value in &self.values {
            rendered = rendered.replacen(CONTENT_PLACEHOLDER, value, 1);
        }
        rendered
    }
}

/// Where a user wants notifications delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    /// Deliver by email (the default).
    #[default]
    Email,
    /// Deliver to the user's webhook.
    Webhook,
}

/// Per-user delivery settings, typically deserialized from user storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserNotifySetting {
    /// Chosen channel; unset means email.
    #[serde(default)]
    pub channel: Option<NotifyChannel>,
    /// Override address for email delivery. Falls back to the account email.
    #[serde(default)]
    pub notification_email: Option<String>,
    /// Destination for webhook delivery.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Secret handed to the webhook collaborator for request signing.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl UserNotifySetting {
    /// The channel to use, defaulting to email.
    pub fn effective_channel(&self) -> NotifyChannel {
        self.channel.unwrap_or_default()
    }
}

/// What the webhook collaborator receives: the raw template and values, not
/// the rendered text.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    /// Notification kind.
    #[serde(rename = "type")]
    pub kind: NotifyKind,
    /// Notification title.
    pub title: String,
    /// Raw content template, placeholders intact.
    pub content: String,
    /// Positional placeholder values.
    pub values: Vec<String>,
}

impl WebhookPayload {
    fn from_notify(payload: &NotifyPayload) -> Self {
        Self {
            kind: payload.kind,
            title: payload.title.clone(),
            content: payload.content.clone(),
            values: payload.values.clone(),
        }
    }
}

/// External rate-limit collaborator, checked before any delivery work.
#[async_trait]
pub trait NotificationLimiter: Send + Sync {
    /// Returns whether this (user, kind) pair may be notified now. An `Err`
    /// means the collaborator itself failed, not that the limit was hit.
    async fn allow(&self, user_id: i64, kind: NotifyKind) -> NotifyResult<bool>;
}

/// External webhook delivery collaborator.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// Delivers the payload to the given URL, signing with the secret when
    /// one is configured.
    async fn deliver(
        &self,
        url: &str,
        secret: Option<&str>,
        payload: &WebhookPayload,
    ) -> NotifyResult<()>;
}

/// The operator account targeted by best-effort system notifications.
#[derive(Debug, Clone)]
pub struct RootIdentity {
    /// Root user id, used for rate limiting.
    pub user_id: i64,
    /// Root account email.
    pub email: String,
    /// Root delivery settings.
    pub setting: UserNotifySetting,
}

/// Routes notifications to the user's chosen channel.
pub struct Router {
    config: Arc<SmtpConfig>,
    mailer: Arc<dyn EmailDeliverer>,
    webhook: Arc<dyn WebhookNotifier>,
    limiter: Arc<dyn NotificationLimiter>,
    root: RootIdentity,
}

impl Router {
    /// Creates a router from its collaborators.
    pub fn new(
        config: Arc<SmtpConfig>,
        mailer: Arc<dyn EmailDeliverer>,
        webhook: Arc<dyn WebhookNotifier>,
        limiter: Arc<dyn NotificationLimiter>,
        root: RootIdentity,
    ) -> Self {
        Self {
            config,
            mailer,
            webhook,
            limiter,
            root,
        }
    }

    /// Delivers a notification to one user over their chosen channel.
    ///
    /// The rate limit is checked first; a refusal surfaces as
    /// [`NotifyError::RateLimited`] without any delivery work. A user with
    /// the email channel but no usable address is skipped successfully, on
    /// the grounds that an unset address is a user choice. A webhook channel
    /// with no URL is a misconfiguration and is logged as an error, but is
    /// also not propagated.
    pub async fn notify_user(
        &self,
        user_id: i64,
        user_email: &str,
        setting: &UserNotifySetting,
        payload: &NotifyPayload,
    ) -> NotifyResult<()> {
        let allowed = self
            .limiter
            .allow(user_id, payload.kind)
            .await
            .map_err(|err| {
                error!(user_id, kind = %payload.kind, error = %err, "rate limit check failed");
                err
            })?;
        if !allowed {
            warn!(user_id, kind = %payload.kind, "notification suppressed by rate limit");
            return Err(NotifyError::RateLimited {
                user_id,
                kind: payload.kind.as_str(),
            });
        }

        match setting.effective_channel() {
            NotifyChannel::Email => self.deliver_email(user_id, user_email, setting, payload).await,
            NotifyChannel::Webhook => self.deliver_webhook(user_id, setting, payload).await,
        }
    }

    /// Notifies the operator account, logging and swallowing any failure.
    /// System events must never take the triggering request down with them.
    pub async fn notify_root(&self, payload: &NotifyPayload) {
        let result = self
            .notify_user(self.root.user_id, &self.root.email, &self.root.setting, payload)
            .await;
        match result {
            Ok(()) => {}
            Err(err) if err.is_rate_limited() => {
                debug!(kind = %payload.kind, "root notification suppressed by rate limit");
            }
            Err(err) => {
                error!(user_id = self.root.user_id, kind = %payload.kind, error = %err,
                    "root notification failed");
            }
        }
    }

    async fn deliver_email(
        &self,
        user_id: i64,
        user_email: &str,
        setting: &UserNotifySetting,
        payload: &NotifyPayload,
    ) -> NotifyResult<()> {
        // The destination is the setting's address only; the account email is
        // never used as a fallback. An unset address means the user opted out.
        let to = setting.notification_email.as_deref().unwrap_or("").trim();
        if to.is_empty() {
            info!(user_id, account_email = user_email, kind = %payload.kind,
                "user has no notification email, skipping");
            return Ok(());
        }

        if !self.config.is_configured() {
            return Err(NotifyError::ConfigMissing);
        }

        let recipients = message::split_recipients(to);
        let built = message::build(
            &payload.title,
            &self.config.system_display_name,
            self.config.effective_from(),
            &recipients,
            &payload.rendered_content(),
        )?;
        debug!(user_id, kind = %payload.kind, message_id = %built.message_id,
            "routing notification to email");
        self.mailer.send(&built, &recipients).await
    }

    async fn deliver_webhook(
        &self,
        user_id: i64,
        setting: &UserNotifySetting,
        payload: &NotifyPayload,
    ) -> NotifyResult<()> {
        let url = setting.webhook_url.as_deref().unwrap_or("").trim();
        if url.is_empty() {
            error!(user_id, kind = %payload.kind,
                "webhook channel selected but no webhook URL configured");
            return Ok(());
        }
        debug!(user_id, kind = %payload.kind, "routing notification to webhook");
        self.webhook
            .deliver(
                url,
                setting.webhook_secret.as_deref(),
                &WebhookPayload::from_notify(payload),
            )
            .await
    }
}
