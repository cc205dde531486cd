//! Acknowledgment of response output.
//!
//! When a response carries the ack-required flag the client answers with an
//! ACK frame built from the header template. With the NOWAIT timer IMS
//! Connect sends nothing back; otherwise it replies and the reply is read
//! and discarded.

use crate::connection::Session;
use crate::error::ClientError;
use bytes::BytesMut;
use irm_protocol::frame::{encode_ack, ACK_FRAME_SIZE};
use irm_protocol::IrmHeader;
use pretty_hex::PrettyHex;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Largest ACK reply accepted.
pub const MAX_ACK_REPLY: usize = 64 * 1024;

/// How an ACK was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Sent with the NOWAIT timer, no reply expected.
    NoWait,
    /// Sent with a timer and the reply of `reply_len` bytes was consumed.
    Replied { reply_len: usize },
}

/// Sends ACK frames for one worker.
#[derive(Debug, Clone)]
pub struct AckCoordinator {
    template: Arc<IrmHeader>,
    allow_nowait: bool,
    frame: [u8; ACK_FRAME_SIZE],
}

impl AckCoordinator {
    /// `allow_nowait` lets the coordinator use the NOWAIT timer when the
    /// response says IMS Connect supports it.
    pub fn new(template: Arc<IrmHeader>, allow_nowait: bool) -> Self {
        Self {
            template,
            allow_nowait,
            frame: [0u8; ACK_FRAME_SIZE],
        }
    }

    pub fn uses_nowait(&self, peer_supports_nowait: bool) -> bool {
        self.allow_nowait && peer_supports_nowait
    }

    /// Sends the ACK and, unless NOWAIT applies, consumes the reply.
    ///
    /// `scratch` receives the reply and is cleared first. Every failure is
    /// reported as [`ClientError::Ack`].
    pub async fn acknowledge<S>(
        &mut self,
        session: &mut Session<S>,
        peer_supports_nowait: bool,
        scratch: &mut BytesMut,
    ) -> Result<AckOutcome, ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let nowait = self.uses_nowait(peer_supports_nowait);
        let len = encode_ack(&self.template, nowait, &mut self.frame)
            .map_err(|e| ack_error(ClientError::Protocol(e)))?;

        tracing::debug!("Sending ACK (nowait={})", nowait);
        session
            .write_frame(&self.frame[..len])
            .await
            .map_err(ack_error)?;

        if nowait {
            return Ok(AckOutcome::NoWait);
        }

        let reply_len = session
            .read_message(scratch, MAX_ACK_REPLY)
            .await
            .map_err(ack_error)?;
        tracing::trace!("ACK reply:\n{}", (&scratch[..reply_len]).hex_dump());
        Ok(AckOutcome::Replied { reply_len })
    }
}

fn ack_error(err: ClientError) -> ClientError {
    let io = match err {
        ClientError::Io(e) | ClientError::Ack(e) => e,
        ClientError::ConnectionClosed => io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed while waiting for the ACK reply",
        ),
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    };
    ClientError::Ack(io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use irm_protocol::{IrmTimer, MessageType};
    use tokio_test::io::Builder;

    fn expected_ack(nowait: bool) -> Vec<u8> {
        let mut buf = vec![0u8; ACK_FRAME_SIZE];
        encode_ack(&IrmHeader::new(), nowait, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_nowait_needs_both_sides() {
        let acks = AckCoordinator::new(Arc::new(IrmHeader::new()), true);
        assert!(acks.uses_nowait(true));
        assert!(!acks.uses_nowait(false));

        let acks = AckCoordinator::new(Arc::new(IrmHeader::new()), false);
        assert!(!acks.uses_nowait(true));
    }

    #[tokio::test]
    async fn test_ack_nowait_reads_nothing() {
        let frame = expected_ack(true);
        let header = IrmHeader::decode(&frame).unwrap();
        assert_eq!(header.timer, IrmTimer::NO_WAIT);
        assert_eq!(header.user.message_type, MessageType::Ack);

        let mock = Builder::new().write(&frame).build();
        let mut session = Session::new(mock, "test");
        let mut acks = AckCoordinator::new(Arc::new(IrmHeader::new()), true);
        let outcome = acks
            .acknowledge(&mut session, true, &mut BytesMut::new())
            .await
            .unwrap();
        assert_eq!(outcome, AckOutcome::NoWait);
    }

    #[tokio::test]
    async fn test_ack_with_reply() {
        let reply = [
            0, 0, 0, 16, 0, 12, 0, 0, b'*', b'C', b'S', b'M', b'O', b'K', b'Y', b'*',
        ];
        let mock = Builder::new()
            .write(&expected_ack(false))
            .read(&reply[..6])
            .read(&reply[6..])
            .build();
        let mut session = Session::new(mock, "test");
        let mut acks = AckCoordinator::new(Arc::new(IrmHeader::new()), true);
        let outcome = acks
            .acknowledge(&mut session, false, &mut BytesMut::new())
            .await
            .unwrap();
        assert_eq!(outcome, AckOutcome::Replied { reply_len: 16 });
    }

    #[tokio::test]
    async fn test_ack_reply_eof_is_ack_error() {
        let mock = Builder::new()
            .write(&expected_ack(false))
            .read(&[0, 0])
            .build();
        let mut session = Session::new(mock, "test");
        let mut acks = AckCoordinator::new(Arc::new(IrmHeader::new()), false);
        let err = acks
            .acknowledge(&mut session, true, &mut BytesMut::new())
            .await
            .unwrap_err();
        match err {
            ClientError::Ack(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected ACK error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ack_write_failure_is_ack_error() {
        let mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
            .build();
        let mut session = Session::new(mock, "test");
        let mut acks = AckCoordinator::new(Arc::new(IrmHeader::new()), true);
        let err = acks
            .acknowledge(&mut session, true, &mut BytesMut::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Ack(_)));
        assert!(err.is_fatal());
    }
}
