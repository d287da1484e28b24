//! # Notification Delivery Library
//!
//! Routes user-facing notifications to email or a webhook:
//! - MIME message construction (RFC 2047 subjects, unique Message-IDs)
//! - Three SMTP transport strategies: implicit TLS, LOGIN auth, standard PLAIN
//! - External rate-limit and webhook collaborators behind traits
//! - Best-effort operator notifications that never fail the caller
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use notify_relay::{
//!     Mailer, NotifyKind, NotifyPayload, RootIdentity, Router, SmtpConfig,
//!     UserNotifySetting,
//! };
//!
//! # use notify_relay::mocks::{LimiterScript, RecordingWebhook, StaticLimiter};
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(
//!         SmtpConfig::builder()
//!             .server("smtp.example.com")
//!             .port(465)
//!             .credentials("bot@example.com", "password")
//!             .build()?,
//!     );
//!
//!     let router = Router::new(
//!         config.clone(),
//!         Arc::new(Mailer::new(config)),
//!         Arc::new(RecordingWebhook::new()),
//!         Arc::new(StaticLimiter::new(LimiterScript::Allow)),
//!         RootIdentity {
//!             user_id: 1,
//!             email: "root@example.com".to_string(),
//!             setting: UserNotifySetting::default(),
//!         },
//!     );
//!
//!     let payload = NotifyPayload::new(
//!         NotifyKind::QuotaExceeded,
//!         "Quota warning",
//!         "Your remaining quota is {{value}}",
//!     )
//!     .value("100");
//!
//!     router
//!         .notify_user(7, "user@example.com", &UserNotifySetting::default(), &payload)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;

// Protocol layer
pub mod auth;
pub mod protocol;

// Message construction
pub mod message;

// Transport layer
pub mod transport;

// Routing
pub mod notify;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use config::{SmtpConfig, SmtpConfigBuilder};
pub use errors::{NotifyError, NotifyResult};
pub use message::OutgoingMessage;
pub use notify::{
    NotificationLimiter, NotifyChannel, NotifyKind, NotifyPayload, RootIdentity, Router,
    UserNotifySetting, WebhookNotifier, WebhookPayload,
};
pub use protocol::{SmtpCommand, SmtpResponse};
pub use transport::{
    Connection, EmailDeliverer, Mailer, OutlookFamily, ServerQuirks, SmtpConnection,
    TransportStrategy,
};
