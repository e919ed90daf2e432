//! Binary framing for operational messages.
//!
//! A frame is a fixed 48-byte header followed by the namespace, key, and
//! payload bytes. All integers are big-endian:
//!
//! ```text
//! offset  size  field
//! 0       2     magic (0x5044)
//! 2       1     protocol version (1)
//! 3       1     flags (bit 0: response)
//! 4       1     opcode
//! 5       1     status
//! 6       1     namespace length
//! 7       1     reserved
//! 8       4     opaque (connection-local sequence)
//! 12      16    request id
//! 28      4     ttl (seconds)
//! 32      4     version
//! 36      4     creation time (unix seconds)
//! 40      2     key length
//! 42      2     reserved
//! 44      4     payload length
//! 48      ...   namespace, key, payload
//! ```
//!
//! Decoding is incremental: [`OperationalMessage::decode`] returns `Ok(None)`
//! until the buffer holds a complete frame, then consumes exactly one frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult};
use crate::message::{MessageKind, OpCode, OpStatus, OperationalMessage, RequestId};

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 48;

/// Leading magic of every frame.
pub const PROTOCOL_MAGIC: u16 = 0x5044;

/// Protocol version this build speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum namespace size in bytes.
pub const MAX_NAMESPACE_SIZE: usize = 255;

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 256;

/// Maximum payload size in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

const FLAG_RESPONSE: u8 = 0b0000_0001;

impl OperationalMessage {
    /// Checks the length bounds the framing can carry.
    pub fn validate(&self) -> WireResult<()> {
        if self.key.is_empty() {
            return Err(WireError::EmptyKey);
        }
        if self.key.len() > MAX_KEY_SIZE {
            return Err(WireError::KeyTooLong(self.key.len()));
        }
        if self.namespace.len() > MAX_NAMESPACE_SIZE {
            return Err(WireError::NamespaceTooLong(self.namespace.len()));
        }
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }
        Ok(())
    }

    /// Appends exactly one frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> WireResult<()> {
        self.validate()?;

        buf.reserve(FRAME_HEADER_SIZE + self.namespace.len() + self.key.len() + self.payload.len());

        let flags = match self.kind {
            MessageKind::Request => 0,
            MessageKind::Response => FLAG_RESPONSE,
        };

        buf.put_u16(PROTOCOL_MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(flags);
        buf.put_u8(self.opcode.as_u8());
        buf.put_u8(self.status.as_u8());
        buf.put_u8(self.namespace.len() as u8);
        buf.put_u8(0); // reserved
        buf.put_u32(self.opaque);
        buf.put_slice(self.request_id.as_bytes());
        buf.put_u32(self.ttl);
        buf.put_u32(self.version);
        buf.put_u32(self.creation_time);
        buf.put_u16(self.key.len() as u16);
        buf.put_u16(0); // reserved
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.namespace);
        buf.put_slice(&self.key);
        buf.put_slice(&self.payload);

        Ok(())
    }

    /// Encodes into a fresh buffer.
    pub fn encode_to_bytes(&self) -> WireResult<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Attempts to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds less than a complete frame, in
    /// which case `buf` is left untouched. On success exactly one frame is
    /// consumed.
    pub fn decode(buf: &mut BytesMut) -> WireResult<Option<OperationalMessage>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek the header without consuming so a short body leaves the
        // buffer intact for the next read.
        let mut header = &buf[..FRAME_HEADER_SIZE];

        let magic = header.get_u16();
        if magic != PROTOCOL_MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        let version = header.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }

        let flags = header.get_u8();
        let opcode = OpCode::try_from(header.get_u8())?;
        let status = OpStatus::try_from(header.get_u8())?;
        let namespace_len = header.get_u8() as usize;
        let _reserved = header.get_u8();
        let opaque = header.get_u32();

        let mut request_id = [0u8; 16];
        header.copy_to_slice(&mut request_id);

        let ttl = header.get_u32();
        let record_version = header.get_u32();
        let creation_time = header.get_u32();

        let key_len = header.get_u16() as usize;
        let _reserved = header.get_u16();
        let payload_len = header.get_u32() as usize;

        if key_len == 0 {
            return Err(WireError::EmptyKey);
        }
        if key_len > MAX_KEY_SIZE {
            return Err(WireError::KeyTooLong(key_len));
        }
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge(payload_len));
        }

        let total = FRAME_HEADER_SIZE + namespace_len + key_len + payload_len;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let namespace = buf.split_to(namespace_len).freeze();
        let key = buf.split_to(key_len).freeze();
        let payload = buf.split_to(payload_len).freeze();

        let kind = if flags & FLAG_RESPONSE != 0 {
            MessageKind::Response
        } else {
            MessageKind::Request
        };

        Ok(Some(OperationalMessage {
            kind,
            opcode,
            status,
            request_id: RequestId::from_bytes(request_id),
            namespace,
            key,
            payload,
            opaque,
            ttl,
            version: record_version,
            creation_time,
        }))
    }
}
