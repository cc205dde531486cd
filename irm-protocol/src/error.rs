//! Protocol error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or decoding IRM frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("field {field} is {len} bytes long (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("field {field} contains non-ASCII characters")]
    NonAscii { field: &'static str },

    #[error("request is empty, a transaction code is required")]
    EmptyRequest,

    #[error("buffer too small: {needed} bytes required, {available} bytes available")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("segment too large: {len} bytes (max {max})")]
    SegmentTooLarge { len: usize, max: usize },

    #[error("invalid total length {len} in response prefix")]
    InvalidLength { len: u32 },

    #[error("response too large: {len} bytes (max {max})")]
    ResponseTooLarge { len: usize, max: usize },

    #[error("malformed segment at offset {offset}: {reason}")]
    MalformedSegment { offset: usize, reason: String },

    #[error("truncated data: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown socket type: {0:#04x}")]
    UnknownSocketType(u8),

    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("timer value {0:?} cannot be encoded in IRM_TIMER")]
    TimerOutOfRange(Duration),
}

impl ProtocolError {
    /// Returns whether the error is a capacity problem with the destination buffer.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            ProtocolError::BufferTooSmall { .. } | ProtocolError::SegmentTooLarge { .. }
        )
    }
}
