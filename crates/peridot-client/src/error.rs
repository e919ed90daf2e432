//! Client error types.

use peridot_wire::WireError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to callers of the connection pipeline.
///
/// Variants are `Clone` because a single connection failure is fanned out to
/// every request in flight on that connection; I/O detail is carried as text
/// for the same reason.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The transport could not be established within the connect timeout.
    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    /// No response arrived within the request timeout.
    #[error("request timeout")]
    RequestTimeout,

    /// The connection's read half terminated while the request was in flight.
    #[error("reader closed")]
    ReaderClosed,

    /// A sequence was assigned while a request with the same sequence was
    /// still in flight. This is an internal invariant violation.
    #[error("sequence {0} already in flight")]
    SequenceCollision(u32),

    /// The processor is shutting down.
    #[error("processor shutting down")]
    ShuttingDown,

    /// Frame encoding or decoding failed.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// TLS material could not be loaded or applied.
    #[error("security error: {0}")]
    Security(String),

    /// I/O error on an established connection.
    #[error("i/o error: {0}")]
    Io(String),
}

impl ClientError {
    pub(crate) fn io(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
