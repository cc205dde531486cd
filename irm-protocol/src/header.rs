//! The IRM request header.
//!
//! Layout (108 bytes, all integers big-endian):
//!
//! ```text
//! +--------+---------+------+------+----------+----------+----------+
//! | llll   | irm_len | arch | f0   | irm_id   | nak_rsn  | reserved |
//! | 4 bytes| 2 bytes | 1    | 1    | 8 bytes  | 2 bytes  | 2 bytes  |
//! +--------+---------+------+------+----------+----------+----------+
//! | f5 | timer | soct | es | client_id |
//! | 1  | 1     | 1    | 1  | 8 bytes   |
//! +----+-------+------+----+-----------+
//! | f1 | f2 | f3 | f4 | trancode | destid | lterm | userid | group |
//! | 1  | 1  | 1  | 1  | 8        | 8      | 8     | 8      | 8     |
//! +----+----+----+----+----------+--------+-------+--------+-------+
//! | password | appl_name | reroute | alt_client_id |
//! | 8        | 8         | 8       | 8             |
//! +----------+-----------+---------+---------------+
//! ```

use crate::error::ProtocolError;
use crate::values::{f1, f2, f3, IrmTimer, MessageType, SocketType, ARCH_LEVEL_1};
use crate::{IRM_SIZE, NAME_LEN};
use bytes::{Buf, BufMut};
use std::fmt;

/// An 8-byte, space padded ASCII field.
///
/// Values built from text are validated on construction, so a header can
/// never carry a field that would spill into its neighbour.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedName([u8; NAME_LEN]);

impl FixedName {
    /// Eight spaces.
    pub const BLANK: FixedName = FixedName([b' '; NAME_LEN]);

    /// Pads `value` to 8 bytes with spaces.
    ///
    /// `field` only names the field in the error.
    pub fn new(field: &'static str, value: &str) -> Result<Self, ProtocolError> {
        if !value.is_ascii() {
            return Err(ProtocolError::NonAscii { field });
        }
        if value.len() > NAME_LEN {
            return Err(ProtocolError::FieldTooLong {
                field,
                len: value.len(),
                max: NAME_LEN,
            });
        }
        let mut bytes = [b' '; NAME_LEN];
        bytes[..value.len()].copy_from_slice(value.as_bytes());
        Ok(Self(bytes))
    }

    /// Wraps 8 bytes received from the wire without validation.
    pub const fn from_wire(bytes: [u8; NAME_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NAME_LEN] {
        &self.0
    }

    /// Returns the value with trailing padding removed.
    pub fn trimmed(&self) -> String {
        String::from_utf8_lossy(&self.0).trim_end().to_string()
    }

    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|&b| b == b' ')
    }
}

impl Default for FixedName {
    fn default() -> Self {
        Self::BLANK
    }
}

impl fmt::Display for FixedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FixedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

/// The architecture level 1 user extension (IRM_USER, 76 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrmUser {
    pub f1: u8,
    pub f2: u8,
    pub f3: u8,
    /// IRM_F4.
    pub message_type: MessageType,
    pub trancode: FixedName,
    pub datastore: FixedName,
    pub lterm: FixedName,
    pub racf_userid: FixedName,
    pub racf_group: FixedName,
    pub racf_password: FixedName,
    pub appl_name: FixedName,
    pub reroute_name: FixedName,
    pub alt_client_id: FixedName,
}

impl Default for IrmUser {
    fn default() -> Self {
        Self {
            f1: f1::TRANSACTION_EXPIRATION,
            f2: f2::CM1 | f2::GENERATE_CLIENT_ID,
            f3: f3::SYNC_CONFIRM,
            message_type: MessageType::SendReceive,
            trancode: FixedName::BLANK,
            datastore: FixedName::BLANK,
            lterm: FixedName::BLANK,
            racf_userid: FixedName::BLANK,
            racf_group: FixedName::BLANK,
            racf_password: FixedName::BLANK,
            appl_name: FixedName::BLANK,
            reroute_name: FixedName::BLANK,
            alt_client_id: FixedName::BLANK,
        }
    }
}

/// The complete IRM header (common part plus user extension).
///
/// A configured header acts as a template: callers clone it per transaction
/// and override the per-transaction fields on the copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrmHeader {
    /// Total frame length, this field included.
    pub total_length: u32,
    /// IRM length, excluding the total length field.
    pub header_length: u16,
    pub arch: u8,
    pub f0: u8,
    /// Identifier of the user message exit that handles the request.
    pub id: FixedName,
    pub nak_reason: u16,
    pub reserved: u16,
    pub f5: u8,
    pub timer: IrmTimer,
    pub socket_type: SocketType,
    /// Unicode encoding schema (0 = none).
    pub encoding: u8,
    pub client_id: FixedName,
    pub user: IrmUser,
}

impl Default for IrmHeader {
    fn default() -> Self {
        Self {
            total_length: IRM_SIZE as u32,
            header_length: (IRM_SIZE - 4) as u16,
            arch: ARCH_LEVEL_1,
            f0: 0,
            id: FixedName(*b"*SAMPLE*"),
            nak_reason: 0,
            reserved: 0,
            f5: 0,
            timer: IrmTimer::HALF_SECOND,
            socket_type: SocketType::Persistent,
            encoding: 0,
            client_id: FixedName::BLANK,
            user: IrmUser::default(),
        }
    }
}

impl IrmHeader {
    /// Creates a header with the baseline flags, timer and socket type.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_id(mut self, id: &str) -> Result<Self, ProtocolError> {
        self.id = FixedName::new("irm_id", id)?;
        Ok(self)
    }

    pub fn with_client_id(mut self, client_id: &str) -> Result<Self, ProtocolError> {
        self.client_id = FixedName::new("client_id", client_id)?;
        Ok(self)
    }

    pub fn with_trancode(mut self, trancode: &str) -> Result<Self, ProtocolError> {
        self.user.trancode = FixedName::new("trancode", trancode)?;
        Ok(self)
    }

    pub fn with_datastore(mut self, datastore: &str) -> Result<Self, ProtocolError> {
        self.user.datastore = FixedName::new("datastore", datastore)?;
        Ok(self)
    }

    pub fn with_lterm(mut self, lterm: &str) -> Result<Self, ProtocolError> {
        self.user.lterm = FixedName::new("lterm", lterm)?;
        Ok(self)
    }

    /// Sets the RACF user ID, group and password.
    pub fn with_credentials(
        mut self,
        userid: &str,
        group: &str,
        password: &str,
    ) -> Result<Self, ProtocolError> {
        self.user.racf_userid = FixedName::new("racf_userid", userid)?;
        self.user.racf_group = FixedName::new("racf_group", group)?;
        self.user.racf_password = FixedName::new("racf_password", password)?;
        Ok(self)
    }

    pub fn with_appl_name(mut self, appl_name: &str) -> Result<Self, ProtocolError> {
        self.user.appl_name = FixedName::new("appl_name", appl_name)?;
        Ok(self)
    }

    pub fn with_reroute_name(mut self, reroute_name: &str) -> Result<Self, ProtocolError> {
        self.user.reroute_name = FixedName::new("reroute_name", reroute_name)?;
        Ok(self)
    }

    pub fn with_alt_client_id(mut self, alt_client_id: &str) -> Result<Self, ProtocolError> {
        self.user.alt_client_id = FixedName::new("alt_client_id", alt_client_id)?;
        Ok(self)
    }

    pub fn with_timer(mut self, timer: IrmTimer) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_socket_type(mut self, socket_type: SocketType) -> Self {
        self.socket_type = socket_type;
        self
    }

    pub fn with_message_type(mut self, message_type: MessageType) -> Self {
        self.user.message_type = message_type;
        self
    }

    /// Replaces the sync level bits of IRM_F3.
    pub fn with_sync_level(mut self, level: u8) -> Self {
        self.user.f3 = (self.user.f3 & !f3::SYNC_MASK) | (level & f3::SYNC_MASK);
        self
    }

    /// Replaces the commit mode bits of IRM_F2.
    pub fn with_commit_mode(mut self, mode: u8) -> Self {
        self.user.f2 = (self.user.f2 & !(f2::CM0 | f2::CM1)) | (mode & (f2::CM0 | f2::CM1));
        self
    }

    /// Returns a transaction-scoped copy carrying the given client ID and
    /// transaction code. `self` is left untouched.
    pub fn for_transaction(&self, client_id: FixedName, trancode: FixedName) -> Self {
        let mut copy = self.clone();
        copy.client_id = client_id;
        copy.user.trancode = trancode;
        copy
    }

    /// Appends the 108 header bytes to `buf`.
    pub fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.total_length);
        buf.put_u16(self.header_length);
        buf.put_u8(self.arch);
        buf.put_u8(self.f0);
        buf.put_slice(self.id.as_bytes());
        buf.put_u16(self.nak_reason);
        buf.put_u16(self.reserved);
        buf.put_u8(self.f5);
        buf.put_u8(self.timer.byte());
        buf.put_u8(self.socket_type as u8);
        buf.put_u8(self.encoding);
        buf.put_slice(self.client_id.as_bytes());

        let user = &self.user;
        buf.put_u8(user.f1);
        buf.put_u8(user.f2);
        buf.put_u8(user.f3);
        buf.put_u8(user.message_type as u8);
        for name in [
            &user.trancode,
            &user.datastore,
            &user.lterm,
            &user.racf_userid,
            &user.racf_group,
            &user.racf_password,
            &user.appl_name,
            &user.reroute_name,
            &user.alt_client_id,
        ] {
            buf.put_slice(name.as_bytes());
        }
    }

    /// Serializes the header into the start of `dst`.
    ///
    /// Returns the number of bytes written (always [`IRM_SIZE`]).
    pub fn encode_into(&self, dst: &mut [u8]) -> Result<usize, ProtocolError> {
        if dst.len() < IRM_SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: IRM_SIZE,
                available: dst.len(),
            });
        }
        let mut out = &mut dst[..IRM_SIZE];
        self.put(&mut out);
        Ok(IRM_SIZE)
    }

    /// Decodes a header from the first 108 bytes of `src`.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < IRM_SIZE {
            return Err(ProtocolError::Truncated {
                needed: IRM_SIZE,
                available: src.len(),
            });
        }
        let mut buf = &src[..IRM_SIZE];

        let total_length = buf.get_u32();
        let header_length = buf.get_u16();
        let arch = buf.get_u8();
        let f0 = buf.get_u8();
        let id = get_name(&mut buf);
        let nak_reason = buf.get_u16();
        let reserved = buf.get_u16();
        let f5 = buf.get_u8();
        let timer = IrmTimer::from_byte(buf.get_u8());
        let socket_type = SocketType::try_from(buf.get_u8())?;
        let encoding = buf.get_u8();
        let client_id = get_name(&mut buf);

        let f1 = buf.get_u8();
        let f2 = buf.get_u8();
        let f3 = buf.get_u8();
        let message_type = MessageType::try_from(buf.get_u8())?;
        let user = IrmUser {
            f1,
            f2,
            f3,
            message_type,
            trancode: get_name(&mut buf),
            datastore: get_name(&mut buf),
            lterm: get_name(&mut buf),
            racf_userid: get_name(&mut buf),
            racf_group: get_name(&mut buf),
            racf_password: get_name(&mut buf),
            appl_name: get_name(&mut buf),
            reroute_name: get_name(&mut buf),
            alt_client_id: get_name(&mut buf),
        };

        Ok(Self {
            total_length,
            header_length,
            arch,
            f0,
            id,
            nak_reason,
            reserved,
            f5,
            timer,
            socket_type,
            encoding,
            client_id,
            user,
        })
    }
}

fn get_name(buf: &mut &[u8]) -> FixedName {
    let mut bytes = [0u8; NAME_LEN];
    buf.copy_to_slice(&mut bytes);
    FixedName::from_wire(bytes)
}
