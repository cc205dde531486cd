//! Coded values carried in the IRM header.
//!
//! Flag bytes are exposed as constant groups (one module per flag byte).
//! Single-valued coded bytes get a typed enum with a `TryFrom<u8>`.

use crate::error::ProtocolError;
use std::fmt;
use std::time::Duration;

/// Architecture level 0: common part only.
pub const ARCH_LEVEL_0: u8 = 0x00;
/// Architecture level 1: common part plus the 76-byte user extension.
pub const ARCH_LEVEL_1: u8 = 0x01;

/// IRM_F0 bits.
pub mod f0 {
    pub const SYNC_ONLY: u8 = 0x80;
    pub const SYNC_ASYNC: u8 = 0x40;
    pub const SYNC_NAK: u8 = 0x20;
    /// NAK reason code present in IRM_NAK_RSNCDE.
    pub const NAK_REASON: u8 = 0x10;
    pub const EXTENSIONS: u8 = 0x04;
    pub const XML_DATA: u8 = 0x02;
    pub const XML_TRANCODE: u8 = 0x01;
}

/// IRM_F1 bits.
pub mod f1 {
    /// MFS MOD name requested.
    pub const MFS_REQUEST: u8 = 0x80;
    /// Client ID requested.
    pub const CLIENT_ID_REQUEST: u8 = 0x40;
    /// Unicode message.
    pub const UNICODE: u8 = 0x20;
    /// Unicode transaction code.
    pub const UNICODE_TRANCODE: u8 = 0x10;
    /// No message text in ACKs for send-only with ACK requests.
    pub const SEND_ONLY_ACK_NO_TEXT: u8 = 0x04;
    /// Send-and-receive CM0 with the NOWAIT option.
    pub const NOWAIT: u8 = 0x02;
    /// Transaction expiration time is set.
    pub const TRANSACTION_EXPIRATION: u8 = 0x01;
}

/// IRM_F2 bits (commit mode and client ID generation).
pub mod f2 {
    /// Commit-then-send.
    pub const CM0: u8 = 0x40;
    /// Send-then-commit.
    pub const CM1: u8 = 0x20;
    pub const SEND_ALTPCB: u8 = 0x02;
    /// Let IMS Connect generate a unique client ID.
    pub const GENERATE_CLIENT_ID: u8 = 0x01;
}

/// IRM_F3 bits (sync level and undeliverable output handling).
pub mod f3 {
    pub const SYNC_NONE: u8 = 0x00;
    pub const SYNC_CONFIRM: u8 = 0x01;
    pub const SYNC_SYNCPT: u8 = 0x02;
    pub const PURGE: u8 = 0x04;
    pub const REROUTE: u8 = 0x08;
    pub const ORDERED: u8 = 0x10;
    pub const IGNORE_PURGE: u8 = 0x20;
    pub const DFS2082: u8 = 0x40;
    pub const CANCEL_CLIENT_ID: u8 = 0x80;

    /// Mask of the sync level bits.
    pub const SYNC_MASK: u8 = 0x03;
}

/// IRM_SOCT: how IMS Connect manages the socket after a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SocketType {
    /// Closed after each transaction.
    Transaction = 0x00,
    /// Kept open across transactions.
    #[default]
    Persistent = 0x10,
    NonPersistent = 0x40,
}

impl TryFrom<u8> for SocketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SocketType::Transaction),
            0x10 => Ok(SocketType::Persistent),
            0x40 => Ok(SocketType::NonPersistent),
            _ => Err(ProtocolError::UnknownSocketType(value)),
        }
    }
}

/// IRM_F4: the message type of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MessageType {
    Ack = b'A',
    CancelTimer = b'C',
    Deallocate = b'D',
    SendOnlyWithError = b'J',
    SendOnlyAck = b'K',
    SyncResponseAck = b'L',
    SyncResponse = b'M',
    Nak = b'N',
    ResumeTpipe = b'R',
    SendOnly = b'S',
    #[default]
    SendReceive = b' ',
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'A' => Ok(MessageType::Ack),
            b'C' => Ok(MessageType::CancelTimer),
            b'D' => Ok(MessageType::Deallocate),
            b'J' => Ok(MessageType::SendOnlyWithError),
            b'K' => Ok(MessageType::SendOnlyAck),
            b'L' => Ok(MessageType::SyncResponseAck),
            b'M' => Ok(MessageType::SyncResponse),
            b'N' => Ok(MessageType::Nak),
            b'R' => Ok(MessageType::ResumeTpipe),
            b'S' => Ok(MessageType::SendOnly),
            b' ' => Ok(MessageType::SendReceive),
            _ => Err(ProtocolError::UnknownMessageType(value)),
        }
    }
}

/// IRM_TIMER: the one-byte encoded wait interval sent to IMS Connect.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrmTimer(u8);

impl IrmTimer {
    /// Use the IMS Connect configured default.
    pub const DEFAULT: IrmTimer = IrmTimer(0x00);
    /// 0.5 seconds.
    pub const HALF_SECOND: IrmTimer = IrmTimer(0x1E);
    /// ACK NOWAIT: IMS Connect does not send a reply to the ACK.
    pub const NO_WAIT: IrmTimer = IrmTimer(0xE9);
    pub const WAIT_FOREVER: IrmTimer = IrmTimer(0xFF);

    pub const fn from_byte(value: u8) -> Self {
        Self(value)
    }

    pub const fn byte(&self) -> u8 {
        self.0
    }

    /// Encodes a wait interval, rounding up to the next representable step.
    ///
    /// A zero duration maps to [`IrmTimer::DEFAULT`].
    pub fn from_duration(duration: Duration) -> Result<Self, ProtocolError> {
        let ms = duration.as_millis();
        let byte = match ms {
            0 => 0x00,
            1..=250 => ms.div_ceil(10) as u8,
            251..=950 => 0x1A + (ms.saturating_sub(300)).div_ceil(50) as u8,
            951..=60_000 => 0x28 + (ms.div_ceil(1_000) as u8 - 1),
            60_001..=3_600_000 => 0x64 + (ms.div_ceil(60_000) as u8 - 1),
            _ => return Err(ProtocolError::TimerOutOfRange(duration)),
        };
        Ok(Self(byte))
    }

    /// Decodes the interval, or `None` for the special values.
    pub fn as_duration(&self) -> Option<Duration> {
        let b = u64::from(self.0);
        match self.0 {
            0x01..=0x19 => Some(Duration::from_millis(b * 10)),
            0x1A..=0x27 => Some(Duration::from_millis(300 + (b - 0x1A) * 50)),
            0x28..=0x63 => Some(Duration::from_secs(b - 0x28 + 1)),
            0x64..=0x9F => Some(Duration::from_secs((b - 0x64 + 1) * 60)),
            _ => None,
        }
    }
}

impl fmt::Debug for IrmTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IrmTimer::DEFAULT => write!(f, "IrmTimer(DEFAULT)"),
            IrmTimer::NO_WAIT => write!(f, "IrmTimer(NO_WAIT)"),
            IrmTimer::WAIT_FOREVER => write!(f, "IrmTimer(WAIT_FOREVER)"),
            _ => match self.as_duration() {
                Some(d) => write!(f, "IrmTimer({:#04x}, {:?})", self.0, d),
                None => write!(f, "IrmTimer({:#04x})", self.0),
            },
        }
    }
}
