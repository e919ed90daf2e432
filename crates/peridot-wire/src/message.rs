//! Operational message types.

use std::fmt::{self, Debug, Display};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use uuid::Uuid;

use crate::error::WireError;

// ============================================================================
// OpCode
// ============================================================================

/// Operation carried by a message.
///
/// `Create` through `Destroy` are the client-facing operations. `Repair` and
/// `MarkDelete` only appear on internal replication traffic; `Nop` is used for
/// liveness probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,
    Create = 1,
    Get = 2,
    Update = 3,
    Set = 4,
    Destroy = 5,
    Repair = 6,
    MarkDelete = 7,
}

impl OpCode {
    /// Returns the wire byte for this opcode.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Nop),
            1 => Ok(Self::Create),
            2 => Ok(Self::Get),
            3 => Ok(Self::Update),
            4 => Ok(Self::Set),
            5 => Ok(Self::Destroy),
            6 => Ok(Self::Repair),
            7 => Ok(Self::MarkDelete),
            other => Err(WireError::InvalidOpCode(other)),
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nop => "Nop",
            Self::Create => "Create",
            Self::Get => "Get",
            Self::Update => "Update",
            Self::Set => "Set",
            Self::Destroy => "Destroy",
            Self::Repair => "Repair",
            Self::MarkDelete => "MarkDelete",
        };
        f.write_str(name)
    }
}

// ============================================================================
// OpStatus
// ============================================================================

/// Outcome of an operation, carried on responses.
///
/// Requests carry `NoError`; the field is only meaningful once a message is a
/// response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpStatus {
    NoError = 0,
    BadMsg = 1,
    BadParam = 2,
    NoKey = 3,
    DupKey = 4,
    VersionConflict = 5,
    RecordLocked = 6,
    ServiceBusy = 7,
    Internal = 8,
}

impl OpStatus {
    /// Returns the wire byte for this status.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this status counts as a successful replication outcome.
    ///
    /// `VersionConflict` is success: the record was superseded by a newer
    /// version on the target, which is still a consistent state.
    pub fn replication_success(self) -> bool {
        matches!(self, Self::NoError | Self::VersionConflict)
    }
}

impl TryFrom<u8> for OpStatus {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NoError),
            1 => Ok(Self::BadMsg),
            2 => Ok(Self::BadParam),
            3 => Ok(Self::NoKey),
            4 => Ok(Self::DupKey),
            5 => Ok(Self::VersionConflict),
            6 => Ok(Self::RecordLocked),
            7 => Ok(Self::ServiceBusy),
            8 => Ok(Self::Internal),
            other => Err(WireError::InvalidStatus(other)),
        }
    }
}

impl Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NoError",
            Self::BadMsg => "BadMsg",
            Self::BadParam => "BadParam",
            Self::NoKey => "NoKey",
            Self::DupKey => "DupKey",
            Self::VersionConflict => "VersionConflict",
            Self::RecordLocked => "RecordLocked",
            Self::ServiceBusy => "ServiceBusy",
            Self::Internal => "Internal",
        };
        f.write_str(name)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Opaque 16-byte end-to-end correlation id, assigned by the caller and
/// round-tripped unchanged by every hop.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId([u8; 16]);

impl RequestId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Wraps raw bytes received off the wire.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0).hyphenated())
    }
}

impl Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({self})")
    }
}

// ============================================================================
// OperationalMessage
// ============================================================================

/// Whether a message is a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// One unit of wire traffic: a request or a response.
///
/// The `opaque` field is a connection-local sequence. It is zero until the
/// sending side stamps it immediately before the message goes on the wire,
/// and servers echo it unchanged on the paired response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationalMessage {
    pub kind: MessageKind,
    pub opcode: OpCode,
    pub status: OpStatus,
    pub request_id: RequestId,
    pub namespace: Bytes,
    pub key: Bytes,
    pub payload: Bytes,
    pub opaque: u32,
    pub ttl: u32,
    pub version: u32,
    /// Record creation time, seconds since the Unix epoch.
    pub creation_time: u32,
}

impl OperationalMessage {
    /// Creates a request for the given operation.
    pub fn request(opcode: OpCode, namespace: impl Into<Bytes>, key: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Request,
            opcode,
            status: OpStatus::NoError,
            request_id: RequestId::new(),
            namespace: namespace.into(),
            key: key.into(),
            payload: Bytes::new(),
            opaque: 0,
            ttl: 0,
            version: 0,
            creation_time: unix_now(),
        }
    }

    /// Creates the response paired with `request`, echoing its correlation
    /// fields.
    pub fn response_to(request: &OperationalMessage, status: OpStatus) -> Self {
        Self {
            kind: MessageKind::Response,
            opcode: request.opcode,
            status,
            request_id: request.request_id,
            namespace: request.namespace.clone(),
            key: request.key.clone(),
            payload: Bytes::new(),
            opaque: request.opaque,
            ttl: request.ttl,
            version: request.version,
            creation_time: request.creation_time,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets the record time-to-live in seconds.
    #[must_use]
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the record version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Whether this message is a response.
    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}
