//! Framed wire messages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result};

/// Magic word sent first on every connection.
pub const PROTOCOL_MAGIC: u32 = 0x57e6_5c96;

/// Well-known rendezvous port.
pub const DEFAULT_PORTMAP_PORT: u16 = 56577;

/// Size of the `{request, length}` header.
pub const HEADER_SIZE: usize = 8;

/// Default upper bound on one message, header included.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Request kinds with their stable wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RequestKind {
    OpenFile = 1,
    AllocArray = 2,
    CreateField = 3,
    Resize = 4,
    ArrayOffsets = 5,
    NamedString = 6,
    SetupDone = 7,
    SetupDoneRead = 8,
    SetupDoneWrite = 9,
    EventFill = 10,
    KeepAlive = 11,
    Done = 12,
    Abort = 13,
    HistogramBook = 14,
}

impl RequestKind {
    pub const fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Result<Self, ProtocolError> {
        Ok(match tag {
            1 => RequestKind::OpenFile,
            2 => RequestKind::AllocArray,
            3 => RequestKind::CreateField,
            4 => RequestKind::Resize,
            5 => RequestKind::ArrayOffsets,
            6 => RequestKind::NamedString,
            7 => RequestKind::SetupDone,
            8 => RequestKind::SetupDoneRead,
            9 => RequestKind::SetupDoneWrite,
            10 => RequestKind::EventFill,
            11 => RequestKind::KeepAlive,
            12 => RequestKind::Done,
            13 => RequestKind::Abort,
            14 => RequestKind::HistogramBook,
            _ => return Err(ProtocolError::UnknownRequest { tag }),
        })
    }

    /// Messages replayed to late-joining consumers.
    pub const fn is_setup(self) -> bool {
        matches!(
            self,
            RequestKind::OpenFile
                | RequestKind::AllocArray
                | RequestKind::CreateField
                | RequestKind::Resize
                | RequestKind::ArrayOffsets
                | RequestKind::NamedString
                | RequestKind::HistogramBook
        ) || self.is_setup_done()
    }

    pub const fn is_setup_done(self) -> bool {
        matches!(self, RequestKind::SetupDone | RequestKind::SetupDoneRead | RequestKind::SetupDoneWrite)
    }

    /// Messages that end the stream.
    pub const fn is_terminal(self) -> bool {
        matches!(self, RequestKind::Done | RequestKind::Abort)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::OpenFile => "open-file",
            RequestKind::AllocArray => "alloc-array",
            RequestKind::CreateField => "create-field",
            RequestKind::Resize => "resize",
            RequestKind::ArrayOffsets => "array-offsets",
            RequestKind::NamedString => "named-string",
            RequestKind::SetupDone => "setup-done",
            RequestKind::SetupDoneRead => "setup-done-read",
            RequestKind::SetupDoneWrite => "setup-done-write",
            RequestKind::EventFill => "event-fill",
            RequestKind::KeepAlive => "keep-alive",
            RequestKind::Done => "done",
            RequestKind::Abort => "abort",
            RequestKind::HistogramBook => "histogram-book",
        };
        f.write_str(name)
    }
}

/// Parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: RequestKind,
    /// Total length including the header.
    pub length: u32,
}

impl MessageHeader {
    /// Validate a raw header against the size limit.
    pub fn parse(bytes: [u8; HEADER_SIZE], max_message_size: u32) -> Result<Self, ProtocolError> {
        let tag = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if length < HEADER_SIZE as u32 || length % 4 != 0 {
            return Err(ProtocolError::BadLength { length });
        }
        if length > max_message_size {
            return Err(ProtocolError::MessageTooLarge { length, max: max_message_size });
        }
        let kind = RequestKind::from_tag(tag)?;
        Ok(Self { kind, length })
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.kind.tag().to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn payload_len(self) -> usize {
        self.length as usize - HEADER_SIZE
    }
}

/// One framed message: a request kind and its word-padded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    kind: RequestKind,
    payload: Vec<u8>,
}

impl WireMessage {
    /// Build a message, zero-padding the payload to a word boundary.
    pub fn new(kind: RequestKind, mut payload: Vec<u8>) -> Self {
        payload.resize(payload.len().next_multiple_of(4), 0);
        Self { kind, payload }
    }

    /// Message without payload.
    pub fn empty(kind: RequestKind) -> Self {
        Self { kind, payload: Vec::new() }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Total encoded length including the header.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn header(&self) -> MessageHeader {
        MessageHeader { kind: self.kind, length: self.encoded_len() as u32 }
    }

    /// Append header and payload to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.reserve(self.encoded_len());
        out.extend_from_slice(&self.header().to_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        for tag in 1..=14 {
            assert_eq!(RequestKind::from_tag(tag).unwrap().tag(), tag);
        }
        assert_eq!(RequestKind::from_tag(0), Err(ProtocolError::UnknownRequest { tag: 0 }));
        assert_eq!(RequestKind::from_tag(15), Err(ProtocolError::UnknownRequest { tag: 15 }));
    }

    #[test]
    fn payload_is_padded_and_length_covers_header() {
        let message = WireMessage::new(RequestKind::NamedString, vec![1, 2, 3, 4, 5]);
        assert_eq!(message.payload().len(), 8);
        let bytes = message.to_bytes();
        assert_eq!(&bytes[..8], &[0, 0, 0, 6, 0, 0, 0, 16]);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn header_validation() {
        let raw = |tag: u32, len: u32| {
            let mut b = [0u8; 8];
            b[..4].copy_from_slice(&tag.to_be_bytes());
            b[4..].copy_from_slice(&len.to_be_bytes());
            b
        };
        assert_eq!(MessageHeader::parse(raw(11, 8), 64).unwrap().payload_len(), 0);
        assert_eq!(MessageHeader::parse(raw(11, 10), 64), Err(ProtocolError::BadLength { length: 10 }));
        assert_eq!(MessageHeader::parse(raw(11, 4), 64), Err(ProtocolError::BadLength { length: 4 }));
        assert_eq!(
            MessageHeader::parse(raw(10, 128), 64),
            Err(ProtocolError::MessageTooLarge { length: 128, max: 64 })
        );
        assert_eq!(MessageHeader::parse(raw(99, 8), 64), Err(ProtocolError::UnknownRequest { tag: 99 }));
    }

    #[test]
    fn setup_classification() {
        assert!(RequestKind::CreateField.is_setup());
        assert!(RequestKind::SetupDoneWrite.is_setup());
        assert!(!RequestKind::EventFill.is_setup());
        assert!(!RequestKind::KeepAlive.is_setup());
        assert!(RequestKind::Abort.is_terminal());
    }
}
