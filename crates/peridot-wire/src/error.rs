//! Wire protocol error types.

use thiserror::Error;

/// Result type for wire protocol operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors produced while encoding or decoding frames.
///
/// All variants are `Clone` so a single decode failure can be fanned out to
/// every request waiting on the connection that produced it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    /// Frame does not start with the protocol magic.
    #[error("bad frame magic: {0:#06x}")]
    BadMagic(u16),

    /// Protocol version is not one this build speaks.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Opcode byte does not name a known operation.
    #[error("invalid opcode: {0}")]
    InvalidOpCode(u8),

    /// Status byte does not name a known status.
    #[error("invalid status: {0}")]
    InvalidStatus(u8),

    /// Messages must carry a key.
    #[error("key must not be empty")]
    EmptyKey,

    /// Key exceeds the maximum key size.
    #[error("key length {0} exceeds maximum of 256 bytes")]
    KeyTooLong(usize),

    /// Namespace exceeds the maximum namespace size.
    #[error("namespace length {0} exceeds maximum of 255 bytes")]
    NamespaceTooLong(usize),

    /// Payload exceeds the maximum payload size.
    #[error("payload length {0} exceeds maximum of 1 MiB")]
    PayloadTooLarge(usize),
}
