//! # irm-protocol
//!
//! Wire protocol implementation for IMS Connect (the IRM request header and
//! the segmented response format).
//!
//! This crate provides:
//! - The fixed 108-byte IRM header (common part plus architecture level 1
//!   user extension) with exact big-endian serialization
//! - Request framing (header + LLZZ text segment + end-of-message marker)
//! - ACK frame construction
//! - Response parsing with control segment classification
//! - Return/reason code text tables

pub mod codes;
pub mod error;
pub mod frame;
pub mod header;
pub mod response;
pub mod values;

pub use error::ProtocolError;
pub use frame::{encode_ack, encode_request, FrameOptions, TransactionRequest, EOM};
pub use header::{FixedName, IrmHeader, IrmUser};
pub use response::{parse_response, peek_total_length, ParsedResponse, RequestStatus};
pub use values::{IrmTimer, MessageType, SocketType};

/// Size of the IRM common part, total length field included.
pub const IRM_COMMON_SIZE: usize = 32;

/// Size of the architecture level 1 user extension.
pub const IRM_USER_SIZE: usize = 76;

/// Size of the complete IRM header as sent on the wire.
pub const IRM_SIZE: usize = IRM_COMMON_SIZE + IRM_USER_SIZE;

/// Width of every fixed text field in the header.
pub const NAME_LEN: usize = 8;

/// Default IMS Connect port.
pub const DEFAULT_PORT: u16 = 9999;
