//! Mail transport layer.
//!
//! [`MailTransport`] is the seam the delivery agent sends through, so tests can
//! substitute a double. [`SmtpTransport`] is the production implementation: one
//! connection per message, implicit TLS or opportunistic STARTTLS, AUTH, then a
//! single MAIL/RCPT/DATA transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use crate::auth::{Credentials, Mechanism};
use crate::config::{SmtpOptions, TlsMode};
use crate::errors::{ReminderError, ReminderErrorKind, ReminderResult};
use crate::mime;
use crate::protocol::{codes, Extensions, SmtpCommand, SmtpReply};
use crate::types::{Email, SendReceipt};

/// Something that can deliver an [`Email`].
#[async_trait]
pub trait MailTransport: Send + Sync + fmt::Debug {
    /// Sends the email once. No retries.
    async fn send(&self, email: &Email) -> ReminderResult<SendReceipt>;
}

/// SMTP submission transport.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    options: SmtpOptions,
}

impl SmtpTransport {
    /// Creates a transport for the given server options.
    pub fn new(options: SmtpOptions) -> Self {
        Self { options }
    }

    async fn perform_transaction(
        &self,
        conn: &mut SmtpConnection,
        email: &Email,
        data: &[u8],
        message_id: &str,
    ) -> ReminderResult<SendReceipt> {
        let client_id = self.options.client_id.as_str();
        conn.greet(client_id).await?;

        if self.options.tls_mode == TlsMode::StartTls && !conn.is_tls() {
            if conn.extensions().starttls {
                conn.start_tls(&self.options.host).await?;
                conn.greet(client_id).await?;
            } else {
                tracing::warn!(host = %self.options.host, "Server does not offer STARTTLS, continuing in plaintext");
            }
        }

        if let Some(credentials) = &self.options.credentials {
            match conn.extensions().preferred_mechanism() {
                Some(mechanism) => conn.authenticate(mechanism, credentials).await?,
                None => tracing::debug!("Server advertises no usable AUTH mechanism, skipping authentication"),
            }
        }

        let mail_from = SmtpCommand::MailFrom(
            email.envelope_from.to_smtp(),
            conn.extensions().max_size.map(|_| data.len()),
        );
        conn.expect_positive(&mail_from).await?;

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for recipient in &email.envelope_to {
            let reply = conn.send_command(&SmtpCommand::RcptTo(recipient.to_smtp())).await?;
            if reply.is_positive() {
                accepted.push(recipient.clone());
            } else {
                tracing::warn!(recipient = %recipient.email, reply = %reply, "Recipient rejected");
                rejected.push(recipient.clone());
            }
        }

        if accepted.is_empty() {
            conn.send_command(&SmtpCommand::Rset).await?;
            return Err(ReminderError::message_error(
                ReminderErrorKind::InvalidRecipientAddress,
                "All recipients were rejected",
            ));
        }

        let reply = conn.send_command(&SmtpCommand::Data).await?;
        if reply.code != codes::DATA_READY {
            return Err(reply.error());
        }

        conn.send_data(data).await?;
        let reply = conn.read_reply().await?;
        if !reply.is_positive() {
            return Err(reply.error());
        }

        Ok(SendReceipt {
            message_id: message_id.to_string(),
            accepted,
            rejected,
            response: reply.joined(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, email: &Email) -> ReminderResult<SendReceipt> {
        let domain = email
            .envelope_from
            .email
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_string())
            .unwrap_or_else(|| self.options.host.clone());
        let message_id = mime::message_id(&domain);
        let data = mime::data_payload(&mime::render(email, &message_id, Utc::now())?);

        let mut conn = SmtpConnection::connect(&self.options).await?;
        let result = self.perform_transaction(&mut conn, email, &data, &message_id).await;
        conn.close().await;
        result
    }
}

/// Stream that can be plain TCP or TLS.
enum ConnectionStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
    /// Placeholder while the stream is being upgraded.
    Closed,
}

/// A single SMTP session.
pub struct SmtpConnection {
    stream: ConnectionStream,
    command_timeout: Duration,
    extensions: Extensions,
    host: String,
}

impl fmt::Debug for SmtpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConnection")
            .field("host", &self.host)
            .field("tls", &self.is_tls())
            .finish()
    }
}

impl SmtpConnection {
    /// Connects, performs implicit TLS when configured, and reads the greeting.
    pub async fn connect(options: &SmtpOptions) -> ReminderResult<Self> {
        let address = options.address();

        let tcp = timeout(options.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ReminderError::timeout(ReminderErrorKind::ConnectTimeout, "Connect timed out"))?
            .map_err(|e| map_io_error(e, &address))?;
        tcp.set_nodelay(true).ok();

        let stream = match options.tls_mode {
            TlsMode::Implicit => {
                let tls = tls_handshake(tcp, &options.host, options.connect_timeout).await?;
                ConnectionStream::Tls(Box::new(BufReader::new(tls)))
            }
            TlsMode::StartTls => ConnectionStream::Plain(BufReader::new(tcp)),
        };

        let mut conn = Self {
            stream,
            command_timeout: options.command_timeout,
            extensions: Extensions::default(),
            host: options.host.clone(),
        };

        let greeting = conn.read_reply().await?;
        if greeting.code != codes::READY {
            return Err(greeting.error());
        }
        tracing::debug!(host = %conn.host, banner = %greeting.text(), "Connected");

        Ok(conn)
    }

    /// Returns true if the session is encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self.stream, ConnectionStream::Tls(_))
    }

    /// Extensions from the last EHLO; empty after a HELO fallback.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Sends EHLO, falling back to HELO.
    pub async fn greet(&mut self, client_id: &str) -> ReminderResult<()> {
        let reply = self.send_command(&SmtpCommand::Ehlo(client_id.to_string())).await?;
        self.extensions = if reply.is_positive() {
            Extensions::from_ehlo(&reply)
        } else {
            self.expect_positive(&SmtpCommand::Helo(client_id.to_string())).await?;
            Extensions::default()
        };
        Ok(())
    }

    /// Upgrades the plaintext session with STARTTLS.
    pub async fn start_tls(&mut self, host: &str) -> ReminderResult<()> {
        self.expect_positive(&SmtpCommand::StartTls).await?;

        let tcp = match std::mem::replace(&mut self.stream, ConnectionStream::Closed) {
            ConnectionStream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(ReminderError::tls("Connection is not in plaintext mode"));
            }
        };

        let tls = tls_handshake(tcp, host, self.command_timeout).await?;
        self.stream = ConnectionStream::Tls(Box::new(BufReader::new(tls)));
        Ok(())
    }

    /// Runs the SASL exchange for `mechanism`.
    pub async fn authenticate(
        &mut self,
        mechanism: Mechanism,
        credentials: &Credentials,
    ) -> ReminderResult<()> {
        if !self.is_tls() {
            tracing::warn!(mechanism = %mechanism, "Authenticating over an unencrypted connection");
        }

        let reply = match mechanism {
            Mechanism::Plain => {
                let initial = credentials.plain_response();
                self.send_command(&SmtpCommand::Auth(mechanism, Some(initial))).await?
            }
            Mechanism::Login => {
                let mut reply = self.send_command(&SmtpCommand::Auth(mechanism, None)).await?;
                for answer in credentials.login_responses() {
                    challenge_expected(&reply)?;
                    reply = self.send_line(&answer).await?;
                }
                reply
            }
            Mechanism::CramMd5 => {
                let challenge = self.send_command(&SmtpCommand::Auth(mechanism, None)).await?;
                challenge_expected(&challenge)?;
                let answer = credentials.cram_md5_response(challenge.text())?;
                self.send_line(&answer).await?
            }
        };

        if reply.code != codes::AUTH_OK {
            return Err(reply.error());
        }
        tracing::debug!(mechanism = %mechanism, "Authenticated");
        Ok(())
    }

    async fn expect_positive(&mut self, command: &SmtpCommand) -> ReminderResult<SmtpReply> {
        let reply = self.send_command(command).await?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(reply.error())
        }
    }

    /// Sends a command and reads the reply.
    pub async fn send_command(&mut self, command: &SmtpCommand) -> ReminderResult<SmtpReply> {
        tracing::debug!(command = %command, "Sending SMTP command");
        self.send_line(&command.line()).await
    }

    async fn send_line(&mut self, line: &str) -> ReminderResult<SmtpReply> {
        self.send_data(format!("{}\r\n", line).as_bytes()).await?;
        self.read_reply().await
    }

    /// Writes raw bytes.
    pub async fn send_data(&mut self, data: &[u8]) -> ReminderResult<()> {
        match &mut self.stream {
            ConnectionStream::Plain(stream) => {
                write_all(stream.get_mut(), data, self.command_timeout).await
            }
            ConnectionStream::Tls(stream) => {
                write_all(stream.get_mut(), data, self.command_timeout).await
            }
            ConnectionStream::Closed => Err(closed_error()),
        }
    }

    /// Reads one (possibly multiline) reply.
    pub async fn read_reply(&mut self) -> ReminderResult<SmtpReply> {
        let reply = match &mut self.stream {
            ConnectionStream::Plain(stream) => read_reply_lines(stream, self.command_timeout).await?,
            ConnectionStream::Tls(stream) => {
                read_reply_lines(&mut **stream, self.command_timeout).await?
            }
            ConnectionStream::Closed => return Err(closed_error()),
        };

        tracing::debug!(code = reply.code, text = %reply.text(), "Received SMTP reply");
        Ok(reply)
    }

    /// Sends QUIT; errors are ignored.
    pub async fn close(&mut self) {
        if !matches!(self.stream, ConnectionStream::Closed) {
            let _ = self.send_command(&SmtpCommand::Quit).await;
            self.stream = ConnectionStream::Closed;
        }
    }
}

fn challenge_expected(reply: &SmtpReply) -> ReminderResult<()> {
    if reply.code == codes::AUTH_CHALLENGE {
        Ok(())
    } else {
        Err(reply.error())
    }
}

fn closed_error() -> ReminderError {
    ReminderError::new(ReminderErrorKind::ConnectionReset, "Connection is closed")
}

fn map_io_error(error: io::Error, address: &str) -> ReminderError {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => {
            ReminderError::connection(format!("Connection refused to {}", address))
        }
        io::ErrorKind::TimedOut => {
            ReminderError::timeout(ReminderErrorKind::ConnectTimeout, "Connect timed out")
        }
        io::ErrorKind::ConnectionReset => {
            ReminderError::new(ReminderErrorKind::ConnectionReset, "Connection reset by server")
        }
        _ => ReminderError::connection(format!("Connection error to {}: {}", address, error)),
    }
}

async fn tls_handshake(
    tcp: TcpStream,
    host: &str,
    timeout_duration: Duration,
) -> ReminderResult<TlsStream<TcpStream>> {
    use rustls::pki_types::ServerName;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| ReminderError::tls(format!("Invalid server name: {}", host)))?;

    timeout(timeout_duration, connector.connect(server_name, tcp))
        .await
        .map_err(|_| ReminderError::timeout(ReminderErrorKind::ConnectTimeout, "TLS handshake timed out"))?
        .map_err(|e| ReminderError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))
}

/// Reads lines until the reply is complete.
async fn read_reply_lines<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    timeout_duration: Duration,
) -> ReminderResult<SmtpReply> {
    let mut lines = Vec::new();

    loop {
        let mut line = String::new();

        let read = timeout(timeout_duration, reader.read_line(&mut line))
            .await
            .map_err(|_| ReminderError::timeout(ReminderErrorKind::ReadTimeout, "Read timed out"))?
            .map_err(|e| ReminderError::protocol(format!("Read error: {}", e)))?;

        if read == 0 {
            return Err(ReminderError::new(
                ReminderErrorKind::ConnectionReset,
                "Server closed connection",
            ));
        }

        let line = line.trim_end().to_string();
        // code-hyphen marks a continuation line
        let is_continuation = line.as_bytes().get(3) == Some(&b'-');
        lines.push(line);

        if !is_continuation {
            break;
        }
    }

    SmtpReply::from_lines(&lines)
}

async fn write_all<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> ReminderResult<()> {
    timeout(timeout_duration, writer.write_all(data))
        .await
        .map_err(|_| ReminderError::timeout(ReminderErrorKind::WriteTimeout, "Write timed out"))?
        .map_err(|e| ReminderError::protocol(format!("Write error: {}", e)))?;

    timeout(timeout_duration, writer.flush())
        .await
        .map_err(|_| ReminderError::timeout(ReminderErrorKind::WriteTimeout, "Flush timed out"))?
        .map_err(|e| ReminderError::protocol(format!("Flush error: {}", e)))?;

    Ok(())
}
