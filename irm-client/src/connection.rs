//! Connection management.
//!
//! A [`Session`] owns one stream to IMS Connect and moves whole frames over
//! it: a request or ACK frame out, one length-prefixed message back.

use crate::error::ClientError;
use crate::tls::build_connector;
use bytes::BytesMut;
use irm_protocol::{ProtocolError, DEFAULT_PORT};
use pin_project_lite::pin_project;
use pretty_hex::PrettyHex;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{lookup_host, TcpStream};
use tokio_rustls::client::TlsStream;

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Size of the total length prefix on every response.
const LENGTH_PREFIX: usize = 4;

/// TLS configuration for IMS Connect connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    pub enabled: bool,
    /// PEM CA bundle used to verify the server. Defaults to the webpki roots.
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate for mutual TLS.
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS.
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification (test systems only).
    pub insecure: bool,
    /// SNI name, defaults to the configured host.
    pub server_name: Option<String>,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host name or address of the IMS Connect instance.
    pub host: String,
    pub port: u16,
    /// Bounds DNS resolution, TCP connect and the TLS handshake.
    pub connect_timeout: Duration,
    pub tls: Option<TlsClientConfig>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn tls_enabled(&self) -> Option<&TlsClientConfig> {
        self.tls.as_ref().filter(|tls| tls.enabled)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

pin_project! {
    /// Stream to an IMS Connect port: plain TCP or TLS over TCP.
    #[project = ImsStreamProj]
    pub enum ImsStream {
        Tcp { #[pin] stream: TcpStream },
        Tls { #[pin] stream: TlsStream<TcpStream> },
    }
}

impl ImsStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, ImsStream::Tls { .. })
    }
}

/// Forwards a poll call to whichever transport is underneath.
macro_rules! either {
    ($this:expr, $s:ident => $call:expr) => {
        match $this.project() {
            ImsStreamProj::Tcp { stream: $s } => $call,
            ImsStreamProj::Tls { stream: $s } => $call,
        }
    };
}

impl AsyncRead for ImsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        either!(self, s => s.poll_read(cx, buf))
    }
}

impl AsyncWrite for ImsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        either!(self, s => s.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        either!(self, s => s.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        either!(self, s => s.poll_shutdown(cx))
    }
}

/// Opens a session to IMS Connect.
///
/// Resolves the host, tries each address in turn and upgrades the socket to
/// TLS when configured. The whole sequence is bounded by the connect timeout.
pub async fn connect(config: &ConnectionConfig) -> Result<Session<ImsStream>, ClientError> {
    let address = config.address();
    tracing::debug!("Connecting to {}...", address);

    let stream = tokio::time::timeout(config.connect_timeout, open_stream(config))
        .await
        .map_err(|_| {
            tracing::debug!("Connection to {} timed out", address);
            ClientError::Timeout
        })??;

    tracing::info!(
        "Connected to {} ({})",
        address,
        if stream.is_tls() { "tls" } else { "tcp" }
    );
    Ok(Session::new(stream, address))
}

async fn open_stream(config: &ConnectionConfig) -> Result<ImsStream, ClientError> {
    let address = config.address();
    let mut last_error = None;
    let mut tcp = None;
    for addr in lookup_host(&address).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    let tcp = match (tcp, last_error) {
        (Some(stream), _) => stream,
        (None, Some(e)) => return Err(ClientError::Io(e)),
        (None, None) => {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {}", address),
            )))
        }
    };

    tcp.set_nodelay(true)?;

    match config.tls_enabled() {
        Some(tls) => {
            let (connector, server_name) = build_connector(tls, &config.host)?;
            tracing::debug!("Performing TLS handshake...");
            let stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
            Ok(ImsStream::Tls { stream })
        }
        None => Ok(ImsStream::Tcp { stream: tcp }),
    }
}

/// A connected session.
///
/// Generic over the stream so the peer can be scripted in tests.
pub struct Session<S> {
    stream: S,
    peer: String,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream,
            peer: peer.into(),
        }
    }

    /// Writes one complete frame.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        tracing::trace!("Sending {} bytes:\n{}", frame.len(), frame.hex_dump());
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one length-prefixed message into `buf`.
    ///
    /// `buf` is cleared first. Reads continue until the declared total length
    /// has arrived; bytes past it are discarded. Returns the message length.
    pub async fn read_message(
        &mut self,
        buf: &mut BytesMut,
        max: usize,
    ) -> Result<usize, ClientError> {
        buf.clear();
        while buf.len() < LENGTH_PREFIX {
            self.fill(buf).await?;
        }

        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if (declared as usize) < LENGTH_PREFIX {
            return Err(ClientError::Protocol(ProtocolError::InvalidLength {
                len: declared,
            }));
        }
        let declared = declared as usize;
        if declared > max {
            return Err(ClientError::Protocol(ProtocolError::ResponseTooLarge {
                len: declared,
                max,
            }));
        }

        if buf.capacity() < declared {
            buf.reserve(declared - buf.len());
        }
        while buf.len() < declared {
            self.fill(buf).await?;
        }

        if buf.len() > declared {
            tracing::warn!(
                "{} bytes received beyond the declared length {} were discarded",
                buf.len() - declared,
                declared
            );
            buf.truncate(declared);
        }

        tracing::trace!("Received {} bytes:\n{}", declared, (&buf[..]).hex_dump());
        Ok(declared)
    }

    async fn fill(&mut self, buf: &mut BytesMut) -> Result<(), ClientError> {
        let n = self.stream.read_buf(buf).await?;
        if n == 0 {
            tracing::debug!("Connection to {} closed by peer", self.peer);
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }

    /// Shuts the stream down.
    pub async fn close(mut self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection to {}", self.peer);
        self.stream.shutdown().await?;
        Ok(())
    }
}
