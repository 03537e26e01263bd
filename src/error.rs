//! Error types for the evwire protocol stack.
//!
//! Errors are grouped by the layer that detects them. Every category is its own
//! `thiserror` enum so that lower layers can return precise errors, and all of them
//! convert into the crate-level [`EvwireError`].
//!
//! ## Error Categories
//!
//! - **Describe errors**: schema authoring mistakes found while building a descriptor
//! - **Protocol errors**: framing, magic, checksum and sequencing violations
//! - **Decode errors**: payloads that do not match the negotiated layout
//! - **Transport errors**: socket I/O failures, including `WouldBlock` in non-blocking mode
//! - **Capacity errors**: the broadcast server cannot satisfy its memory ceiling
//!
//! ## Recovery
//!
//! Only [`TransportError::WouldBlock`] is retryable. Protocol and decode errors are
//! session-fatal: offsets are written in place, so a half-applied message cannot be
//! recovered.
//!
//! ```rust
//! use evwire::{EvwireError, TransportError};
//!
//! let error = EvwireError::from(TransportError::WouldBlock);
//! assert!(error.is_retryable());
//! assert!(!error.is_session_fatal());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for evwire operations.
pub type Result<T, E = EvwireError> = std::result::Result<T, E>;

/// Mistakes made while describing a record layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescribeError {
    #[error("field '{name}' is already described")]
    NameCollision { name: String },

    #[error("field '{name}' at {offset:#x}+{size} overlaps field '{other}'")]
    Overlap { name: String, offset: u32, size: u32, other: String },

    #[error("field '{name}' is controlled by '{controlling}', which is not described")]
    DanglingControl { name: String, controlling: String },

    #[error("field '{name}' cannot be controlled by '{controlling}': {reason}")]
    BadControlLimit { name: String, controlling: String, reason: String },

    #[error("field '{name}' has invalid placement {offset:#x}+{size} (4-byte slots required)")]
    BadSize { name: String, offset: u32, size: u32 },

    #[error("record '{name}' cannot shrink from {current} to {requested} bytes")]
    Shrink { name: String, current: u32, requested: u32 },
}

/// Framing and handshake violations. Always fatal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("bad magic {found:#010x} (expected {expected:#010x})")]
    BadMagic { expected: u32, found: u32 },

    #[error("no port map reply within {duration:?}")]
    PortmapTimeout { duration: Duration },

    #[error("message length {length} is invalid")]
    BadLength { length: u32 },

    #[error("message of {length} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { length: u32, max: u32 },

    #[error("unknown request tag {tag}")]
    UnknownRequest { tag: u32 },

    #[error("malformed {context} payload: {details}")]
    MalformedPayload { context: String, details: String },

    #[error("unexpected {kind} message while {state}")]
    UnexpectedMessage { kind: String, state: String },

    #[error("layout checksum mismatch: sender {sent:#010x}, local {local:#010x}")]
    ChecksumMismatch { sent: u32, local: u32 },

    #[error("shipped pack list does not match the described layout")]
    PackListMismatch,

    #[error("producer aborted the session: {reason}")]
    Aborted { reason: String },

    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Payload contents that do not agree with the negotiated layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message ended after {consumed} words, layout needs more")]
    ShortMessage { consumed: usize },

    #[error("{remaining} words left after the layout was exhausted")]
    TrailingData { remaining: usize },

    #[error("control value {value} at offset {offset:#x} exceeds limit {max}")]
    ControlOutOfRange { offset: u32, value: u32, max: u32 },

    #[error("bit-compacted stream truncated or corrupt at byte {position}")]
    TruncatedOrCorrupt { position: usize },

    #[error("unknown payload encoding marker {marker:#010x}")]
    BadMarker { marker: u32 },
}

/// Socket level failures.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("operation would block")]
    WouldBlock,

    #[error("I/O failure during {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed by peer")]
    Closed,
}

/// The broadcast server could not keep within its memory ceiling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("chunk memory ceiling of {ceiling} bytes exceeded ({in_use} in use, {requested} requested)")]
    CeilingExceeded { ceiling: usize, in_use: usize, requested: usize },

    #[error("allocation of {requested} bytes is larger than the ceiling of {ceiling} bytes")]
    RequestTooLarge { requested: usize, ceiling: usize },

    #[error("consumer limit of {max} reached")]
    TooManyConsumers { max: usize },
}

/// Main error type for evwire operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EvwireError {
    #[error("layout description error: {0}")]
    Describe(#[from] DescribeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("capacity error: {0}")]
    Capacity(#[from] CapacityError),

    #[error("configuration error: {details}")]
    Config { details: String },

    #[error("background task failed: {details}")]
    Task { details: String },
}

impl EvwireError {
    /// Returns whether the operation may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EvwireError::Transport(TransportError::WouldBlock))
    }

    /// Returns whether the error requires the session to be closed.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            EvwireError::Protocol(_) | EvwireError::Decode(_) | EvwireError::Task { .. } => true,
            EvwireError::Transport(TransportError::WouldBlock) => false,
            EvwireError::Transport(_) => true,
            EvwireError::Describe(_) | EvwireError::Capacity(_) | EvwireError::Config { .. } => {
                false
            }
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            EvwireError::Describe(_) => vec![
                "Check field offsets and sizes for overlaps",
                "Describe controlling fields before the arrays they bound",
                "Give every controlling field a max_count covering its arrays",
            ],
            EvwireError::Protocol(_) => vec![
                "Verify both ends speak the same protocol version",
                "Check that the port belongs to an evwire server",
                "Reconnect to start a fresh session",
            ],
            EvwireError::Decode(_) => vec![
                "Reconnect so the layouts are negotiated again",
                "Check that the producer did not change its layout mid-session",
            ],
            EvwireError::Transport(TransportError::WouldBlock) => {
                vec!["Wait for readiness notification and retry"]
            }
            EvwireError::Transport(_) => vec![
                "Check that the server is running and reachable",
                "Reconnect to start a fresh session",
            ],
            EvwireError::Capacity(_) => vec![
                "Raise the server memory ceiling",
                "Lower the chunk size",
                "Reduce the number of stalled consumers",
            ],
            EvwireError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare values against the documented defaults",
            ],
            EvwireError::Task { .. } => vec![
                "Check the logs for a panic in the reader task",
                "Open a new subscription",
            ],
        }
    }

    /// Helper constructor for I/O failures with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::WouldBlock {
            return EvwireError::Transport(TransportError::WouldBlock);
        }
        EvwireError::Transport(TransportError::Io { context: context.into(), source })
    }

    /// Helper constructor for malformed payloads.
    pub fn malformed(context: impl Into<String>, details: impl Into<String>) -> Self {
        EvwireError::Protocol(ProtocolError::MalformedPayload {
            context: context.into(),
            details: details.into(),
        })
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        EvwireError::Config { details: details.into() }
    }
}

impl From<std::io::Error> for EvwireError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock => EvwireError::Transport(TransportError::WouldBlock),
            std::io::ErrorKind::UnexpectedEof => EvwireError::Transport(TransportError::Closed),
            _ => EvwireError::Transport(TransportError::Io { context: "socket".into(), source: err }),
        }
    }
}
