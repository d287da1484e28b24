//! Email transport: strategy selection, the socket-level connection, and the
//! SMTP transaction driver.
//!
//! Every send opens a fresh connection, runs one transaction (EHLO, AUTH,
//! envelope, DATA), and closes with a best-effort QUIT. There is no pooling
//! and no internal retry; failures propagate to the caller.
//!
//! Strategy selection is a pure function of the configuration plus a
//! [`ServerQuirks`] predicate:
//!
//! 1. Port 465 or `ssl_enabled` selects implicit TLS with PLAIN auth.
//! 2. Otherwise a server that requires LOGIN auth (Outlook-family accounts
//!    or an operator allowlist entry) selects LOGIN over plaintext.
//! 3. Everything else uses PLAIN over plaintext.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use crate::auth::{self, AuthMechanism};
use crate::config::SmtpConfig;
use crate::errors::{NotifyError, NotifyResult};
use crate::message::OutgoingMessage;
use crate::protocol::{codes, SmtpCommand, SmtpResponse};

/// How a message reaches the configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStrategy {
    /// TLS from the first byte (port 465 or `ssl_enabled`), PLAIN auth.
    ImplicitTls,
    /// Plaintext connection, LOGIN challenge/response auth.
    LoginAuth,
    /// Plaintext connection, PLAIN auth.
    Standard,
}

impl TransportStrategy {
    /// Selects the strategy for a configuration.
    ///
    /// Implicit TLS wins over everything: an Outlook account on port 465
    /// still gets implicit TLS with PLAIN auth.
    pub fn select(config: &SmtpConfig, quirks: &dyn ServerQuirks) -> Self {
        if config.port == 465 || config.ssl_enabled {
            TransportStrategy::ImplicitTls
        } else if config.login_auth_servers.contains(&config.server)
            || quirks.requires_login_auth(&config.account, &config.server)
        {
            TransportStrategy::LoginAuth
        } else {
            TransportStrategy::Standard
        }
    }

    /// The authentication mechanism this strategy uses.
    pub fn mechanism(&self) -> AuthMechanism {
        match self {
            TransportStrategy::LoginAuth => AuthMechanism::Login,
            _ => AuthMechanism::Plain,
        }
    }

    /// Whether the connection is TLS from the first byte.
    pub fn uses_implicit_tls(&self) -> bool {
        matches!(self, TransportStrategy::ImplicitTls)
    }
}

/// Predicate for servers that reject PLAIN and need the LOGIN sequence.
pub trait ServerQuirks: Send + Sync {
    /// Returns true when the (account, server) pair must authenticate with
    /// LOGIN instead of PLAIN.
    fn requires_login_auth(&self, account: &str, server: &str) -> bool;
}

/// Built-in detection of Microsoft consumer mail accounts, which reject
/// PLAIN on the submission port.
#[derive(Debug, Default, Clone)]
pub struct OutlookFamily;

impl ServerQuirks for OutlookFamily {
    fn requires_login_auth(&self, account: &str, _server: &str) -> bool {
        account.contains("@outlook.") || account.contains("@hotmail.")
    }
}

/// One SMTP connection, mockable at the command level.
#[async_trait]
pub trait SmtpConnection: Send {
    /// Sends a command and reads the reply.
    async fn command(&mut self, command: &SmtpCommand) -> NotifyResult<SmtpResponse>;

    /// Sends a bare continuation line (LOGIN base64 responses) and reads the
    /// reply. Never logged: the line carries credentials.
    async fn send_line(&mut self, line: &str) -> NotifyResult<SmtpResponse>;

    /// Sends the already dot-stuffed DATA payload and reads the final reply.
    async fn send_payload(&mut self, payload: &[u8]) -> NotifyResult<SmtpResponse>;

    /// Best-effort QUIT. Errors are ignored; the connection is gone either
    /// way.
    async fn close(&mut self);
}

#[derive(Debug)]
enum Stream {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<TlsStream<TcpStream>>),
}

/// A live connection to the configured server, greeting already consumed.
#[derive(Debug)]
pub struct Connection {
    stream: Stream,
    command_timeout: Duration,
    peer: String,
}

impl Connection {
    /// Opens a plaintext connection and waits for the 220 greeting.
    pub async fn open(config: &SmtpConfig) -> NotifyResult<Self> {
        let address = config.address();
        let dial = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&address)).await;
        let tcp = match dial {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(source)) => return Err(NotifyError::connect(address, source)),
            Err(_) => {
                return Err(NotifyError::connect_timeout(address, config.connect_timeout))
            }
        };
        Self::finish_open(Stream::Plain(BufReader::new(tcp)), config).await
    }

    /// Opens a connection that is TLS from the first byte and waits for the
    /// 220 greeting. Dial and handshake share the connect timeout.
    pub async fn open_tls(config: &SmtpConfig) -> NotifyResult<Self> {
        let address = config.address();
        let tls_config = Arc::new(tls_client_config(config.verify_certificates));
        let server = config.server.clone();

        let handshake = async move {
            let tcp = TcpStream::connect(&address).await?;
            let name = ServerName::try_from(server)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
            TlsConnector::from(tls_config).connect(name, tcp).await
        };

        let result = tokio::time::timeout(config.connect_timeout, handshake).await;
        let tls = match result {
            Ok(Ok(tls)) => tls,
            Ok(Err(source)) => return Err(NotifyError::connect(config.address(), source)),
            Err(_) => {
                return Err(NotifyError::connect_timeout(
                    config.address(),
                    config.connect_timeout,
                ))
            }
        };
        Self::finish_open(Stream::Tls(BufReader::new(tls)), config).await
    }

    async fn finish_open(stream: Stream, config: &SmtpConfig) -> NotifyResult<Self> {
        let mut conn = Self {
            stream,
            command_timeout: config.command_timeout,
            peer: config.address(),
        };
        let greeting = conn.read_response().await.map_err(|err| {
            NotifyError::connect(
                config.address(),
                io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
            )
        })?;
        if greeting.code != codes::SERVICE_READY {
            return Err(NotifyError::connect(
                config.address(),
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected greeting: {greeting}"),
                ),
            ));
        }
        trace!(peer = %conn.peer, "server greeting accepted");
        Ok(conn)
    }

    async fn read_response(&mut self) -> NotifyResult<SmtpResponse> {
        let deadline = self.command_timeout;
        let result = tokio::time::timeout(deadline, self.read_response_inner()).await;
        match result {
            Ok(inner) => inner,
            Err(_) => Err(NotifyError::transmit(format!(
                "timed out waiting for response from {}",
                self.peer
            ))),
        }
    }

    async fn read_response_inner(&mut self) -> NotifyResult<SmtpResponse> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = match &mut self.stream {
                Stream::Plain(reader) => reader.read_line(&mut line).await,
                Stream::Tls(reader) => reader.read_line(&mut line).await,
            };
            let n = read.map_err(|err| {
                NotifyError::transmit(format!("read from {} failed: {err}", self.peer))
            })?;
            if n == 0 {
                return Err(NotifyError::transmit(format!(
                    "connection closed by {}",
                    self.peer
                )));
            }
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            // "250-..." continues the reply, "250 ..." (or a bare code) ends it.
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                break;
            }
        }
        SmtpResponse::parse(&lines)
    }

    async fn write_all(&mut self, bytes: &[u8]) -> NotifyResult<()> {
        let deadline = self.command_timeout;
        let write = async {
            match &mut self.stream {
                Stream::Plain(reader) => {
                    let stream = reader.get_mut();
                    stream.write_all(bytes).await?;
                    stream.flush().await
                }
                Stream::Tls(reader) => {
                    let stream = reader.get_mut();
                    stream.write_all(bytes).await?;
                    stream.flush().await
                }
            }
        };
        let result = tokio::time::timeout(deadline, write).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(NotifyError::transmit(format!(
                "write to {} failed: {err}",
                self.peer
            ))),
            Err(_) => Err(NotifyError::transmit(format!(
                "write to {} timed out",
                self.peer
            ))),
        }
    }
}

#[async_trait]
impl SmtpConnection for Connection {
    async fn command(&mut self, command: &SmtpCommand) -> NotifyResult<SmtpResponse> {
        trace!(peer = %self.peer, command = command.name(), "sending command");
        let mut wire = command.to_smtp_string().into_bytes();
        wire.extend_from_slice(b"\r\n");
        self.write_all(&wire).await?;
        self.read_response().await
    }

    async fn send_line(&mut self, line: &str) -> NotifyResult<SmtpResponse> {
        let mut wire = line.as_bytes().to_vec();
        wire.extend_from_slice(b"\r\n");
        self.write_all(&wire).await?;
        self.read_response().await
    }

    async fn send_payload(&mut self, payload: &[u8]) -> NotifyResult<SmtpResponse> {
        self.write_all(payload).await?;
        self.read_response().await
    }

    async fn close(&mut self) {
        let mut wire = SmtpCommand::Quit.to_smtp_string().into_bytes();
        wire.extend_from_slice(b"\r\n");
        if self.write_all(&wire).await.is_ok() {
            let _ = self.read_response().await;
        }
    }
}

fn tls_client_config(verify_certificates: bool) -> rustls::ClientConfig {
    if verify_certificates {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        // Internal relays commonly present self-signed certificates; the
        // default tolerates them, `verify_certificates` opts out.
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerify::new()))
            .with_no_client_auth()
    }
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any server certificate. Signatures are still checked so the
    /// handshake itself stays well-formed.
    #[derive(Debug)]
    pub(super) struct NoVerify(CryptoProvider);

    impl NoVerify {
        pub(super) fn new() -> Self {
            Self(ring::default_provider())
        }
    }

    impl ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

/// Drives one full transaction over an open connection.
///
/// Recipients are submitted one RCPT TO at a time; the first rejection stops
/// the exchange before DATA, so a partial recipient list is never committed.
pub(crate) async fn run_transaction<C: SmtpConnection + ?Sized>(
    conn: &mut C,
    config: &SmtpConfig,
    mechanism: AuthMechanism,
    message: &OutgoingMessage,
    recipients: &[String],
) -> NotifyResult<()> {
    let response = conn
        .command(&SmtpCommand::Ehlo(config.hello_name().to_string()))
        .await?;
    if !response.is_success() {
        return Err(NotifyError::transmit(format!("EHLO rejected: {response}")));
    }

    authenticate(conn, config, mechanism).await?;

    let from = config.effective_from().to_string();
    let response = conn
        .command(&SmtpCommand::MailFrom {
            address: from.clone(),
        })
        .await?;
    if !response.is_success() {
        return Err(NotifyError::Envelope {
            address: from,
            response: response.full_message(),
        });
    }

    for recipient in recipients {
        let response = conn
            .command(&SmtpCommand::RcptTo {
                address: recipient.clone(),
            })
            .await?;
        if !response.is_success() {
            return Err(NotifyError::Envelope {
                address: recipient.clone(),
                response: response.full_message(),
            });
        }
    }

    let response = conn.command(&SmtpCommand::Data).await?;
    if response.code != codes::START_MAIL_INPUT {
        return Err(NotifyError::transmit(format!("DATA rejected: {response}")));
    }

    let response = conn.send_payload(&message.data_bytes()).await?;
    if !response.is_success() {
        return Err(NotifyError::transmit(format!(
            "message rejected after DATA: {response}"
        )));
    }

    debug!(message_id = %message.message_id, recipients = recipients.len(), "message accepted");
    Ok(())
}

async fn authenticate<C: SmtpConnection + ?Sized>(
    conn: &mut C,
    config: &SmtpConfig,
    mechanism: AuthMechanism,
) -> NotifyResult<()> {
    let auth_err = |response: &SmtpResponse| NotifyError::Auth {
        server: config.server.clone(),
        response: response.full_message(),
    };

    match mechanism {
        AuthMechanism::Plain => {
            let response = conn
                .command(&SmtpCommand::Auth {
                    mechanism: mechanism.mechanism_name(),
                    initial_response: Some(auth::plain_initial_response(
                        &config.account,
                        &config.token,
                    )),
                })
                .await?;
            if response.code != codes::AUTH_SUCCESS {
                return Err(auth_err(&response));
            }
        }
        AuthMechanism::Login => {
            let response = conn
                .command(&SmtpCommand::Auth {
                    mechanism: mechanism.mechanism_name(),
                    initial_response: None,
                })
                .await?;
            if response.code != codes::AUTH_CONTINUE {
                return Err(auth_err(&response));
            }
            let response = conn.send_line(&auth::login_username(&config.account)).await?;
            if response.code != codes::AUTH_CONTINUE {
                return Err(auth_err(&response));
            }
            let response = conn.send_line(&auth::login_password(&config.token)).await?;
            if response.code != codes::AUTH_SUCCESS {
                return Err(auth_err(&response));
            }
        }
    }
    Ok(())
}

/// Anything that can deliver a built message to a recipient list. The router
/// depends on this seam so it can be tested without a network.
#[async_trait]
pub trait EmailDeliverer: Send + Sync {
    /// Delivers the message to every recipient in one transaction.
    async fn send(&self, message: &OutgoingMessage, recipients: &[String]) -> NotifyResult<()>;
}

/// The production deliverer: selects a strategy, opens a connection, runs
/// one transaction under the configured send deadline.
pub struct Mailer {
    config: Arc<SmtpConfig>,
    quirks: Arc<dyn ServerQuirks>,
}

impl Mailer {
    /// Creates a mailer with the built-in Outlook-family quirk detection.
    pub fn new(config: Arc<SmtpConfig>) -> Self {
        Self::with_quirks(config, Arc::new(OutlookFamily))
    }

    /// Creates a mailer with a custom quirk predicate.
    pub fn with_quirks(config: Arc<SmtpConfig>, quirks: Arc<dyn ServerQuirks>) -> Self {
        Self { config, quirks }
    }

    /// The strategy the next send would use.
    pub fn strategy(&self) -> TransportStrategy {
        TransportStrategy::select(&self.config, self.quirks.as_ref())
    }

    async fn dispatch(
        &self,
        strategy: TransportStrategy,
        message: &OutgoingMessage,
        recipients: &[String],
    ) -> NotifyResult<()> {
        let mut conn = if strategy.uses_implicit_tls() {
            Connection::open_tls(&self.config).await?
        } else {
            Connection::open(&self.config).await?
        };
        let result = run_transaction(
            &mut conn,
            &self.config,
            strategy.mechanism(),
            message,
            recipients,
        )
        .await;
        conn.close().await;
        result
    }
}

#[async_trait]
impl EmailDeliverer for Mailer {
    async fn send(&self, message: &OutgoingMessage, recipients: &[String]) -> NotifyResult<()> {
        if !self.config.is_configured() {
            return Err(NotifyError::ConfigMissing);
        }
        let strategy = self.strategy();
        debug!(
            server = %self.config.server,
            port = self.config.port,
            strategy = ?strategy,
            recipients = recipients.len(),
            "delivering message"
        );
        let deadline = self.config.send_timeout;
        let result =
            tokio::time::timeout(deadline, self.dispatch(strategy, message, recipients)).await;
        match result {
            Ok(inner) => inner,
            Err(_) => {
                warn!(server = %self.config.server, "send deadline exceeded, aborting");
                Err(NotifyError::send_deadline(deadline))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message;
    use crate::mocks::{response, MockConnection};
    use rstest::rstest;
    use std::time::Duration;
    use tokio_test::assert_err;

    fn config() -> SmtpConfig {
        SmtpConfig::builder()
            .server("smtp.example.com")
            .credentials("bot@example.com", "hunter2")
            .build()
            .unwrap()
    }

    fn test_message() -> OutgoingMessage {
        message::build(
            "subject",
            "System",
            "bot@example.com",
            &["a@x.com".to_string()],
            "<p>hi</p>",
        )
        .unwrap()
    }

    fn recipients(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case(465, false, "bot@example.com", "smtp.example.com", TransportStrategy::ImplicitTls)]
    #[case(587, true, "bot@example.com", "smtp.example.com", TransportStrategy::ImplicitTls)]
    // Implicit TLS dominates the LOGIN quirk.
    #[case(465, false, "bot@outlook.com", "smtp.office365.com", TransportStrategy::ImplicitTls)]
    #[case(587, false, "bot@outlook.com", "smtp.office365.com", TransportStrategy::LoginAuth)]
    #[case(587, false, "bot@hotmail.co.uk", "smtp.office365.com", TransportStrategy::LoginAuth)]
    #[case(587, false, "bot@example.com", "smtp.example.com", TransportStrategy::Standard)]
    #[case(25, false, "bot@example.com", "smtp.example.com", TransportStrategy::Standard)]
    fn test_strategy_selection(
        #[case] port: u16,
        #[case] ssl: bool,
        #[case] account: &str,
        #[case] server: &str,
        #[case] expected: TransportStrategy,
    ) {
        let config = SmtpConfig::builder()
            .server(server)
            .port(port)
            .ssl_enabled(ssl)
            .credentials(account, "t")
            .build()
            .unwrap();
        assert_eq!(TransportStrategy::select(&config, &OutlookFamily), expected);
    }

    #[test]
    fn test_strategy_selection_allowlist() {
        let config = SmtpConfig::builder()
            .server("legacy.example.net")
            .credentials("bot@example.com", "t")
            .login_auth_server("legacy.example.net")
            .build()
            .unwrap();
        assert_eq!(
            TransportStrategy::select(&config, &OutlookFamily),
            TransportStrategy::LoginAuth
        );
    }

    #[test]
    fn test_strategy_mechanisms() {
        assert_eq!(TransportStrategy::ImplicitTls.mechanism(), AuthMechanism::Plain);
        assert_eq!(TransportStrategy::LoginAuth.mechanism(), AuthMechanism::Login);
        assert_eq!(TransportStrategy::Standard.mechanism(), AuthMechanism::Plain);
    }

    #[tokio::test]
    async fn test_transaction_plain_happy_path() {
        let mut conn = MockConnection::script(vec![
            response(250, "smtp.example.com"),
            response(235, "2.7.0 Accepted"),
            response(250, "sender ok"),
            response(250, "recipient ok"),
            response(250, "recipient ok"),
            response(354, "go ahead"),
            response(250, "queued as 12345"),
        ]);
        let config = config();
        let message = test_message();

        run_transaction(
            &mut conn,
            &config,
            AuthMechanism::Plain,
            &message,
            &recipients(&["a@x.com", "b@y.com"]),
        )
        .await
        .unwrap();

        let verbs: Vec<String> = conn
            .commands
            .iter()
            .map(|c| c.split_whitespace().next().unwrap_or("").to_string())
            .collect();
        assert_eq!(verbs, ["EHLO", "AUTH", "MAIL", "RCPT", "RCPT", "DATA"]);
        assert_eq!(conn.payloads.len(), 1);
        assert!(conn.payloads[0].ends_with(b"\r\n.\r\n"));
    }

    #[tokio::test]
    async fn test_transaction_login_sequence() {
        let mut conn = MockConnection::script(vec![
            response(250, "smtp.office365.com"),
            response(334, "VXNlcm5hbWU6"),
            response(334, "UGFzc3dvcmQ6"),
            response(235, "2.7.0 Accepted"),
            response(250, "sender ok"),
            response(250, "recipient ok"),
            response(354, "go ahead"),
            response(250, "queued"),
        ]);
        let config = config();
        let message = test_message();

        run_transaction(
            &mut conn,
            &config,
            AuthMechanism::Login,
            &message,
            &recipients(&["a@x.com"]),
        )
        .await
        .unwrap();

        // Username then password, both base64.
        assert_eq!(conn.lines, vec!["Ym90QGV4YW1wbGUuY29t", "aHVudGVyMg=="]);
        assert!(conn.commands.iter().any(|c| c == "AUTH LOGIN"));
    }

    #[tokio::test]
    async fn test_transaction_auth_rejection() {
        let mut conn = MockConnection::script(vec![
            response(250, "hello"),
            response(535, "5.7.8 Bad credentials"),
        ]);
        let config = config();
        let message = test_message();

        let err = run_transaction(
            &mut conn,
            &config,
            AuthMechanism::Plain,
            &message,
            &recipients(&["a@x.com"]),
        )
        .await
        .unwrap_err();

        match err {
            NotifyError::Auth { server, response } => {
                assert_eq!(server, "smtp.example.com");
                assert!(response.contains("Bad credentials"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transaction_stops_at_rejected_recipient() {
        let mut conn = MockConnection::script(vec![
            response(250, "hello"),
            response(235, "accepted"),
            response(250, "sender ok"),
            response(250, "recipient ok"),
            response(550, "5.1.1 user unknown"),
        ]);
        let config = config();
        let message = test_message();

        let err = run_transaction(
            &mut conn,
            &config,
            AuthMechanism::Plain,
            &message,
            &recipients(&["a@x.com", "b@y.com"]),
        )
        .await
        .unwrap_err();

        match err {
            NotifyError::Envelope { address, .. } => assert_eq!(address, "b@y.com"),
            other => panic!("unexpected error: {other}"),
        }
        // DATA must never be issued after an envelope rejection.
        assert!(!conn.commands.iter().any(|c| c == "DATA"));
        assert!(conn.payloads.is_empty());
    }

    #[tokio::test]
    async fn test_transaction_data_rejected() {
        let mut conn = MockConnection::script(vec![
            response(250, "hello"),
            response(235, "accepted"),
            response(250, "sender ok"),
            response(250, "recipient ok"),
            response(354, "go ahead"),
            response(554, "5.7.1 rejected by content filter"),
        ]);
        let config = config();
        let message = test_message();

        let err = run_transaction(
            &mut conn,
            &config,
            AuthMechanism::Plain,
            &message,
            &recipients(&["a@x.com"]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NotifyError::Transmit { .. }));
    }

    #[tokio::test]
    async fn test_transaction_uses_effective_from() {
        let mut conn = MockConnection::script(vec![
            response(250, "hello"),
            response(235, "accepted"),
            response(250, "sender ok"),
            response(250, "recipient ok"),
            response(354, "go ahead"),
            response(250, "queued"),
        ]);
        let config = config();
        let message = test_message();

        run_transaction(
            &mut conn,
            &config,
            AuthMechanism::Plain,
            &message,
            &recipients(&["a@x.com"]),
        )
        .await
        .unwrap();

        // No explicit from: falls back to the account.
        assert!(conn
            .commands
            .iter()
            .any(|c| c == "MAIL FROM:<bot@example.com>"));
    }

    // Accepts connections and never speaks, for deadline tests.
    async fn silent_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut sockets = Vec::new();
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                sockets.push(socket);
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_greeting_timeout_surfaces_connect_error() {
        let (addr, server) = silent_server().await;
        let config = SmtpConfig::builder()
            .server("127.0.0.1")
            .port(addr.port())
            .credentials("bot@example.com", "t")
            .connect_timeout(Duration::from_millis(100))
            .command_timeout(Duration::from_millis(100))
            .send_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let err = assert_err!(Connection::open(&config).await);
        match err {
            NotifyError::Connect { address, source } => {
                assert_eq!(address, config.address());
                assert!(source.to_string().contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn test_send_deadline_aborts_stalled_send() {
        let (addr, server) = silent_server().await;
        // Generous per-command timeout so only the whole-send deadline can
        // fire against a server that never sends its greeting.
        let config = SmtpConfig::builder()
            .server("127.0.0.1")
            .port(addr.port())
            .credentials("bot@example.com", "t")
            .connect_timeout(Duration::from_millis(200))
            .command_timeout(Duration::from_secs(30))
            .send_timeout(Duration::from_millis(300))
            .build()
            .unwrap();

        let mailer = Mailer::new(Arc::new(config));
        let message = test_message();
        let err = assert_err!(mailer.send(&message, &recipients(&["a@x.com"])).await);
        match err {
            NotifyError::Transmit { reason } => assert!(reason.contains("send deadline")),
            other => panic!("unexpected error: {other}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn test_mailer_rejects_unconfigured() {
        let config = Arc::new(SmtpConfig::default());
        let mailer = Mailer::new(config);
        let message = test_message();
        let err = mailer
            .send(&message, &recipients(&["a@x.com"]))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::ConfigMissing));
    }
}
