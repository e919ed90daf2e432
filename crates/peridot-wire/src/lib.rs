//! # peridot-wire: binary wire protocol for `peridot`
//!
//! This crate defines the [`OperationalMessage`], the unit of traffic between
//! a peridot client and a proxy, and its binary framing. One frame carries
//! exactly one request or one response.
//!
//! ## Frame layout
//!
//! A frame is a fixed 48-byte header followed by the namespace, key, and
//! payload bytes. All integers are big-endian. See [`OperationalMessage::encode`]
//! for the field-by-field layout.
//!
//! ## Correlation
//!
//! Two identifiers travel with every message:
//!
//! - [`RequestId`]: a 16-byte id assigned by the caller, opaque to the
//!   transport, used for end-to-end tracing.
//! - `opaque`: a 32-bit connection-local sequence stamped by the sender and
//!   echoed unchanged by the server. Response demultiplexing keys on it.

mod codec;
mod error;
mod message;

pub use codec::{
    FRAME_HEADER_SIZE, MAX_KEY_SIZE, MAX_NAMESPACE_SIZE, MAX_PAYLOAD_SIZE, PROTOCOL_MAGIC,
    PROTOCOL_VERSION,
};
pub use error::{WireError, WireResult};
pub use message::{MessageKind, OpCode, OpStatus, OperationalMessage, RequestId};
