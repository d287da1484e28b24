//! SMTP configuration for the notification subsystem.
//!
//! The configuration is an immutable value constructed once at startup
//! (builder-validated) and shared by `Arc` with the transport and the
//! router. Nothing in the hot path reads ambient global state.

use std::collections::HashSet;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{NotifyError, NotifyResult};

/// Default SMTP submission port.
pub const DEFAULT_PORT: u16 = 587;

/// Default timeout for establishing the connection (including TLS).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a single command round-trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for a whole send, connect to final response.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(120);

/// Process-wide SMTP settings, read-only after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname. May be empty when email is unconfigured; sends
    /// then fail with `ConfigMissing` before any I/O.
    #[serde(default)]
    pub server: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Account used for authentication (usually the sender mailbox).
    #[serde(default)]
    pub account: String,
    /// Credential token or password (never serialized).
    #[serde(skip, default = "empty_secret")]
    pub token: SecretString,
    /// Sender address; falls back to `account` when empty.
    #[serde(default)]
    pub from: String,
    /// Force implicit TLS regardless of port.
    #[serde(default)]
    pub ssl_enabled: bool,
    /// Display name used in the From header.
    #[serde(default = "default_display_name")]
    pub system_display_name: String,
    /// Server hostnames that require LOGIN-style authentication in addition
    /// to the built-in Outlook-family detection.
    #[serde(default)]
    pub login_auth_servers: HashSet<String>,
    /// Hostname announced in EHLO.
    #[serde(default)]
    pub hello_name: Option<String>,
    /// Verify the server certificate on the implicit-TLS path. Off by
    /// default to tolerate self-signed internal relays; hardened deployments
    /// should enable it.
    #[serde(default)]
    pub verify_certificates: bool,
    /// Timeout for dial plus TLS handshake.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Timeout for each command round-trip and each payload write.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Deadline for a whole send; expiry aborts the attempt and releases the
    /// connection.
    #[serde(default = "default_send_timeout", with = "humantime_serde")]
    pub send_timeout: Duration,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}
fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}
fn default_send_timeout() -> Duration {
    DEFAULT_SEND_TIMEOUT
}
fn default_display_name() -> String {
    "System".to_string()
}
fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_PORT,
            account: String::new(),
            token: empty_secret(),
            from: String::new(),
            ssl_enabled: false,
            system_display_name: default_display_name(),
            login_auth_servers: HashSet::new(),
            hello_name: None,
            verify_certificates: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl SmtpConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> NotifyResult<()> {
        if self.port == 0 {
            return Err(NotifyError::ConfigMissing);
        }
        if self.send_timeout < self.connect_timeout {
            return Err(NotifyError::transmit(
                "send_timeout must not be shorter than connect_timeout",
            ));
        }
        Ok(())
    }

    /// Returns true when at least one of server and account is set.
    pub fn is_configured(&self) -> bool {
        !(self.server.is_empty() && self.account.is_empty())
    }

    /// The effective sender address: `from`, or `account` when `from` is
    /// empty.
    pub fn effective_from(&self) -> &str {
        if self.from.is_empty() {
            &self.account
        } else {
            &self.from
        }
    }

    /// The full server address as host:port.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// Hostname announced in EHLO.
    pub fn hello_name(&self) -> &str {
        self.hello_name.as_deref().unwrap_or("localhost")
    }
}

/// Builder for [`SmtpConfig`].
#[derive(Debug, Default)]
pub struct SmtpConfigBuilder {
    config: SmtpConfig,
}

impl SmtpConfigBuilder {
    /// Sets the server hostname.
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.config.server = server.into();
        self
    }

    /// Sets the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the account and credential token.
    pub fn credentials(mut self, account: impl Into<String>, token: impl Into<String>) -> Self {
        self.config.account = account.into();
        self.config.token = SecretString::new(token.into());
        self
    }

    /// Sets the sender address.
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.config.from = from.into();
        self
    }

    /// Forces implicit TLS regardless of port.
    pub fn ssl_enabled(mut self, enabled: bool) -> Self {
        self.config.ssl_enabled = enabled;
        self
    }

    /// Sets the From-header display name.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.config.system_display_name = name.into();
        self
    }

    /// Adds a server hostname that requires LOGIN authentication.
    pub fn login_auth_server(mut self, server: impl Into<String>) -> Self {
        self.config.login_auth_servers.insert(server.into());
        self
    }

    /// Sets the EHLO hostname.
    pub fn hello_name(mut self, name: impl Into<String>) -> Self {
        self.config.hello_name = Some(name.into());
        self
    }

    /// Enables certificate verification on the implicit-TLS path.
    pub fn verify_certificates(mut self, verify: bool) -> Self {
        self.config.verify_certificates = verify;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the per-command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    /// Sets the whole-send deadline.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> NotifyResult<SmtpConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Humantime serde support for the duration fields.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = SmtpConfig::builder()
            .server("smtp.example.com")
            .credentials("bot@example.com", "hunter2")
            .build()
            .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
        assert!(!config.ssl_enabled);
        assert!(!config.verify_certificates);
        assert_eq!(config.hello_name(), "localhost");
    }

    #[test]
    fn test_effective_from_falls_back_to_account() {
        let config = SmtpConfig::builder()
            .server("smtp.example.com")
            .credentials("bot@example.com", "hunter2")
            .build()
            .unwrap();
        assert_eq!(config.effective_from(), "bot@example.com");

        let config = SmtpConfig::builder()
            .server("smtp.example.com")
            .credentials("bot@example.com", "hunter2")
            .from("noreply@example.com")
            .build()
            .unwrap();
        assert_eq!(config.effective_from(), "noreply@example.com");
    }

    #[test]
    fn test_is_configured() {
        assert!(!SmtpConfig::default().is_configured());
        assert!(SmtpConfig::builder()
            .server("smtp.example.com")
            .build()
            .unwrap()
            .is_configured());
        // Account alone is enough.
        assert!(SmtpConfig::builder()
            .credentials("bot@example.com", "t")
            .build()
            .unwrap()
            .is_configured());
    }

    #[test]
    fn test_validation() {
        assert!(SmtpConfig::builder().port(0).build().is_err());
        assert!(SmtpConfig::builder()
            .send_timeout(Duration::from_secs(1))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .is_err());
    }

    #[test]
    fn test_token_not_serialized() {
        let config = SmtpConfig::builder()
            .server("smtp.example.com")
            .credentials("bot@example.com", "hunter2")
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
