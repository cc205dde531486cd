//! Client error types.

use irm_protocol::{ProtocolError, RequestStatus};
use thiserror::Error;

/// Client errors.
///
/// Errors are either scoped to one request (the worker reports them and
/// takes the next request) or fatal to the connection; see
/// [`ClientError::is_fatal`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request does not fit the send buffer: {0}")]
    Capacity(ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connect timeout")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("{0}")]
    Business(RequestStatus),

    #[error("ACK failed: {0}")]
    Ack(std::io::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("worker pool has shut down")]
    PoolClosed,
}

impl ClientError {
    /// Returns whether the error leaves the connection unusable.
    ///
    /// A worker that hits a fatal error reports it once and stops.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Configuration(_)
            | ClientError::Capacity(_)
            | ClientError::Business(_) => false,
            ClientError::Io(_)
            | ClientError::ConnectionClosed
            | ClientError::Timeout
            | ClientError::Protocol(_)
            | ClientError::Ack(_)
            | ClientError::TlsConfig(_)
            | ClientError::TlsHandshake(_)
            | ClientError::PoolClosed => true,
        }
    }

    /// Returns the classified status for business errors.
    pub fn status(&self) -> Option<&RequestStatus> {
        match self {
            ClientError::Business(status) => Some(status),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::FieldTooLong { .. }
            | ProtocolError::NonAscii { .. }
            | ProtocolError::EmptyRequest
            | ProtocolError::TimerOutOfRange(_) => ClientError::Configuration(err.to_string()),
            err if err.is_capacity() => ClientError::Capacity(err),
            err => ClientError::Protocol(err),
        }
    }
}
