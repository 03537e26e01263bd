//! Wire protocol: framed messages and their typed payloads.
//!
//! Every message is an 8-byte header `{request, length}` (big-endian, length
//! including the header) followed by a payload padded to a 4-byte boundary.
//! [`Message`] is the typed view used by sessions; [`WireMessage`] is the
//! opaque framed form stored and forwarded by the broadcast server.

mod event;
mod frame;
mod message;
mod payload;
mod setup;

pub use event::{EventBody, EventFill, MARKER_BITS, MARKER_PLAIN};
pub use frame::FrameDecoder;
pub use message::{
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORTMAP_PORT, HEADER_SIZE, MessageHeader, PROTOCOL_MAGIC,
    RequestKind, WireMessage,
};
pub use payload::{PayloadReader, PayloadWriter};
pub use setup::{
    AllocArray, ArrayOffsets, CreateField, HistogramBook, NamedString, OpenFile, Resize, SetupDone,
    SetupMode, describe_messages,
};

use crate::Result;

/// Typed form of every request kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    OpenFile(OpenFile),
    AllocArray(AllocArray),
    CreateField(CreateField),
    Resize(Resize),
    ArrayOffsets(ArrayOffsets),
    NamedString(NamedString),
    SetupDone(SetupDone),
    EventFill(EventFill),
    KeepAlive,
    Done,
    Abort { reason: String },
    HistogramBook(HistogramBook),
}

impl Message {
    /// Parse a framed message. Event fills need the negotiated sort-key width.
    pub fn decode(wire: &WireMessage, sort_key_words: u32) -> Result<Self> {
        let payload = wire.payload();
        Ok(match wire.kind() {
            RequestKind::OpenFile => Message::OpenFile(OpenFile::parse(payload)?),
            RequestKind::AllocArray => Message::AllocArray(AllocArray::parse(payload)?),
            RequestKind::CreateField => Message::CreateField(CreateField::parse(payload)?),
            RequestKind::Resize => Message::Resize(Resize::parse(payload)?),
            RequestKind::ArrayOffsets => Message::ArrayOffsets(ArrayOffsets::parse(payload)?),
            RequestKind::NamedString => Message::NamedString(NamedString::parse(payload)?),
            kind @ (RequestKind::SetupDone | RequestKind::SetupDoneRead | RequestKind::SetupDoneWrite) => {
                let mode = SetupMode::from_kind(kind).unwrap_or_default();
                Message::SetupDone(SetupDone::parse(mode, payload)?)
            }
            RequestKind::EventFill => Message::EventFill(EventFill::parse(payload, sort_key_words)?),
            RequestKind::KeepAlive => Message::KeepAlive,
            RequestKind::Done => Message::Done,
            RequestKind::Abort => {
                let mut r = PayloadReader::new(payload, "abort");
                let reason = if r.remaining() == 0 { String::new() } else { r.str()? };
                r.finish()?;
                Message::Abort { reason }
            }
            RequestKind::HistogramBook => Message::HistogramBook(HistogramBook::parse(payload)?),
        })
    }

    /// Frame the message.
    pub fn encode(&self) -> WireMessage {
        match self {
            Message::OpenFile(m) => m.to_wire(),
            Message::AllocArray(m) => m.to_wire(),
            Message::CreateField(m) => m.to_wire(),
            Message::Resize(m) => m.to_wire(),
            Message::ArrayOffsets(m) => m.to_wire(),
            Message::NamedString(m) => m.to_wire(),
            Message::SetupDone(m) => m.to_wire(),
            Message::EventFill(m) => m.to_wire(),
            Message::KeepAlive => WireMessage::empty(RequestKind::KeepAlive),
            Message::Done => WireMessage::empty(RequestKind::Done),
            Message::Abort { reason } => {
                WireMessage::new(RequestKind::Abort, PayloadWriter::new().str(reason).finish())
            }
            Message::HistogramBook(m) => m.to_wire(),
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Message::OpenFile(_) => RequestKind::OpenFile,
            Message::AllocArray(_) => RequestKind::AllocArray,
            Message::CreateField(_) => RequestKind::CreateField,
            Message::Resize(_) => RequestKind::Resize,
            Message::ArrayOffsets(_) => RequestKind::ArrayOffsets,
            Message::NamedString(_) => RequestKind::NamedString,
            Message::SetupDone(m) => m.mode.kind(),
            Message::EventFill(_) => RequestKind::EventFill,
            Message::KeepAlive => RequestKind::KeepAlive,
            Message::Done => RequestKind::Done,
            Message::Abort { .. } => RequestKind::Abort,
            Message::HistogramBook(_) => RequestKind::HistogramBook,
        }
    }
}
