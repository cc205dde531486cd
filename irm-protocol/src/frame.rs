//! Outbound frame construction.
//!
//! A request frame is laid out as:
//!
//! ```text
//! +-----------+------+------+-------------+------------+
//! | IRM       | LL   | ZZ   | text        | EOM        |
//! | 108 bytes | 2    | 2    | LL-4 bytes  | 00 04 00 00|
//! +-----------+------+------+-------------+------------+
//! ```
//!
//! The IRM total length covers the whole frame. An ACK frame is the IRM
//! followed directly by the EOM.

use crate::error::ProtocolError;
use crate::header::{FixedName, IrmHeader};
use crate::values::{f1, IrmTimer, MessageType};
use crate::IRM_SIZE;
use bytes::BufMut;

/// End-of-message marker: an empty segment (LL = 4, ZZ = 0).
pub const EOM: [u8; 4] = [0x00, 0x04, 0x00, 0x00];

/// Size of a segment's LL and ZZ fields.
pub const LLZZ_SIZE: usize = 4;

/// Largest text that fits a single segment.
pub const MAX_SEGMENT_TEXT: usize = u16::MAX as usize - LLZZ_SIZE;

/// Size of an ACK frame.
pub const ACK_FRAME_SIZE: usize = IRM_SIZE + EOM.len();

/// Framing switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOptions {
    /// Send the whole request line, transaction code included, as the
    /// segment text instead of only the text after the code.
    pub include_trancode: bool,
}

/// A request line split into its transaction code and text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionRequest<'a> {
    pub trancode: FixedName,
    /// Text after the transaction code and its separator.
    pub text: &'a str,
    /// The request line as received.
    pub line: &'a str,
}

impl<'a> TransactionRequest<'a> {
    /// Splits `line` on its first whitespace character.
    ///
    /// The part before it is the transaction code (at most 8 ASCII
    /// characters); the part after it is sent verbatim. A line starting with
    /// whitespace carries a blank transaction code. Blank lines are rejected.
    pub fn parse(line: &'a str) -> Result<Self, ProtocolError> {
        if line.trim().is_empty() {
            return Err(ProtocolError::EmptyRequest);
        }
        let (code, text) = match line.char_indices().find(|(_, c)| c.is_whitespace()) {
            Some((idx, sep)) => (&line[..idx], &line[idx + sep.len_utf8()..]),
            None => (line, ""),
        };
        let trancode = FixedName::new("trancode", code)?;
        Ok(Self {
            trancode,
            text,
            line,
        })
    }

    /// Returns the bytes that go into the text segment.
    pub fn payload(&self, options: &FrameOptions) -> &'a [u8] {
        if options.include_trancode {
            self.line.as_bytes()
        } else {
            self.text.as_bytes()
        }
    }
}

/// Returns the size of a request frame carrying `text_len` bytes of text.
pub fn request_frame_len(text_len: usize) -> usize {
    IRM_SIZE + LLZZ_SIZE + text_len + EOM.len()
}

/// Frames a transaction request into `dst`.
///
/// The header written is a copy of `template` carrying `client_id` and the
/// request's transaction code. Returns the frame length.
pub fn encode_request(
    template: &IrmHeader,
    client_id: FixedName,
    request: &TransactionRequest<'_>,
    options: &FrameOptions,
    dst: &mut [u8],
) -> Result<usize, ProtocolError> {
    let text = request.payload(options);
    if text.len() > MAX_SEGMENT_TEXT {
        return Err(ProtocolError::SegmentTooLarge {
            len: text.len(),
            max: MAX_SEGMENT_TEXT,
        });
    }

    let total = request_frame_len(text.len());
    if dst.len() < total {
        return Err(ProtocolError::BufferTooSmall {
            needed: total,
            available: dst.len(),
        });
    }

    let mut header = template.for_transaction(client_id, request.trancode);
    header.total_length = total as u32;

    let mut out = &mut dst[..total];
    header.put(&mut out);
    out.put_u16((text.len() + LLZZ_SIZE) as u16);
    out.put_u16(0);
    out.put_slice(text);
    out.put_slice(&EOM);

    Ok(total)
}

/// Frames an ACK for the last response into `dst`.
///
/// With `nowait` the NOWAIT timer and the F1 NOWAIT bit ask IMS Connect not
/// to reply to the ACK; otherwise the ACK waits half a second for its reply.
pub fn encode_ack(
    template: &IrmHeader,
    nowait: bool,
    dst: &mut [u8],
) -> Result<usize, ProtocolError> {
    if dst.len() < ACK_FRAME_SIZE {
        return Err(ProtocolError::BufferTooSmall {
            needed: ACK_FRAME_SIZE,
            available: dst.len(),
        });
    }

    let mut ack = template.clone();
    ack.total_length = ACK_FRAME_SIZE as u32;
    ack.user.message_type = MessageType::Ack;
    if nowait {
        ack.timer = IrmTimer::NO_WAIT;
        ack.user.f1 |= f1::NOWAIT;
    } else {
        ack.timer = IrmTimer::HALF_SECOND;
    }

    let mut out = &mut dst[..ACK_FRAME_SIZE];
    ack.put(&mut out);
    out.put_slice(&EOM);

    Ok(ACK_FRAME_SIZE)
}
