//! SASL exchanges for the two mechanisms the transport speaks.
//!
//! PLAIN (RFC 4616) is the default; LOGIN is the obsolete base64
//! username/password prompt sequence still required by Outlook-family and
//! some legacy relay servers.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

/// Authentication mechanisms supported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN initial-response authentication.
    Plain,
    /// LOGIN challenge/response authentication.
    Login,
}

impl AuthMechanism {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::Login => "LOGIN",
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Generates the initial response for PLAIN authentication.
///
/// Wire format is `\0account\0token`, base64 encoded.
pub fn plain_initial_response(account: &str, token: &SecretString) -> String {
    let response = format!("\0{}\0{}", account, token.expose_secret());
    BASE64.encode(response)
}

/// Generates the LOGIN username continuation line.
pub fn login_username(account: &str) -> String {
    BASE64.encode(account)
}

/// Generates the LOGIN password continuation line.
pub fn login_password(token: &SecretString) -> String {
    BASE64.encode(token.expose_secret())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_initial_response() {
        let token = SecretString::new("hunter2".to_string());
        let response = plain_initial_response("bot@example.com", &token);
        let decoded = BASE64.decode(&response).unwrap();
        assert_eq!(decoded, b"\0bot@example.com\0hunter2");
    }

    #[test]
    fn test_login_continuations() {
        let token = SecretString::new("hunter2".to_string());
        assert_eq!(
            BASE64.decode(login_username("bot@example.com")).unwrap(),
            b"bot@example.com"
        );
        assert_eq!(BASE64.decode(login_password(&token)).unwrap(), b"hunter2");
    }

    #[test]
    fn test_mechanism_names() {
        assert_eq!(AuthMechanism::Plain.to_string(), "PLAIN");
        assert_eq!(AuthMechanism::Login.to_string(), "LOGIN");
    }
}
