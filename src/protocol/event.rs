//! Event-fill payloads.
//!
//! ```text
//! sort_key[sort_key_words] struct_index ntuple_index raw_words raw[raw_words]
//! MARKER_PLAIN words...
//! MARKER_BITS  unpacked_bytes stream_bytes stream (padded)
//! ```

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::payload::{PayloadReader, PayloadWriter};
use super::{RequestKind, WireMessage};
use crate::codec::{Encoding, decode_bits, decode_plain, encode_bits, encode_plain};
use crate::layout::{EventBuffer, PackList};
use crate::{DecodeError, EvwireError, Result};

/// Marker word preceding plain-packed words.
pub const MARKER_PLAIN: u32 = 0x504c_4149;

/// Marker word preceding a bit-compacted stream.
pub const MARKER_BITS: u32 = 0x4249_5453;

/// Encoded record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventBody {
    Plain(Vec<u32>),
    Bits { unpacked_bytes: u32, stream: Vec<u8> },
}

impl EventBody {
    /// Wrap plain-packed words in the requested encoding.
    pub fn from_words(words: Vec<u32>, encoding: Encoding) -> Self {
        match encoding {
            Encoding::Plain => EventBody::Plain(words),
            Encoding::Bits => {
                let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
                EventBody::Bits { unpacked_bytes: bytes.len() as u32, stream: encode_bits(&bytes) }
            }
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            EventBody::Plain(_) => Encoding::Plain,
            EventBody::Bits { .. } => Encoding::Bits,
        }
    }

    /// Plain-packed words, expanding a compacted body.
    ///
    /// A compacted body claiming more than `max_words` words is rejected before
    /// anything is allocated for it.
    pub fn words(&self, max_words: usize) -> Result<Cow<'_, [u32]>> {
        match self {
            EventBody::Plain(words) => Ok(Cow::Borrowed(words)),
            EventBody::Bits { unpacked_bytes, stream } => {
                if *unpacked_bytes as usize / 4 > max_words {
                    return Err(EvwireError::malformed(
                        "event-fill",
                        format!("unpacked size {} exceeds the layout's {} words", unpacked_bytes, max_words),
                    ));
                }
                let mut bytes = vec![0u8; *unpacked_bytes as usize];
                decode_bits(stream, &mut bytes)?;
                Ok(Cow::Owned(
                    bytes.chunks_exact(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]])).collect(),
                ))
            }
        }
    }
}

/// One event as carried by an event-fill message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFill {
    pub sort_key: Vec<u32>,
    pub struct_index: u32,
    pub ntuple_index: u32,
    pub raw: Vec<u32>,
    pub body: EventBody,
}

impl EventFill {
    /// Encode `event` with `list`; fails without side effects on an out-of-range count.
    pub fn pack(
        list: &PackList,
        event: &EventBuffer,
        sort_key: &[u32],
        raw: &[u32],
        encoding: Encoding,
    ) -> Result<Self> {
        let mut words = Vec::with_capacity(list.slot_count());
        encode_plain(list, event, &mut words)?;
        Ok(Self {
            sort_key: sort_key.to_vec(),
            struct_index: 0,
            ntuple_index: 0,
            raw: raw.to_vec(),
            body: EventBody::from_words(words, encoding),
        })
    }

    /// Decode the body into `event` (cleared first).
    pub fn unpack_into(&self, list: &PackList, event: &mut EventBuffer) -> Result<()> {
        let words = self.body.words(list.slot_count())?;
        decode_plain(list, &words, event)
    }

    pub fn to_wire(&self) -> WireMessage {
        let mut w = PayloadWriter::with_capacity(64 + self.raw.len() * 4);
        w.words(&self.sort_key).u32(self.struct_index).u32(self.ntuple_index);
        w.u32(self.raw.len() as u32).words(&self.raw);
        match &self.body {
            EventBody::Plain(words) => {
                w.u32(MARKER_PLAIN).words(words);
            }
            EventBody::Bits { unpacked_bytes, stream } => {
                w.u32(MARKER_BITS).u32(*unpacked_bytes).u32(stream.len() as u32).bytes(stream);
            }
        }
        WireMessage::new(RequestKind::EventFill, w.finish())
    }

    /// Parse a payload whose sort key is `sort_key_words` long.
    pub fn parse(payload: &[u8], sort_key_words: u32) -> Result<Self> {
        let mut r = PayloadReader::new(payload, "event-fill");
        let sort_key = r.words(sort_key_words as usize)?;
        let struct_index = r.u32()?;
        let ntuple_index = r.u32()?;
        let raw = r.counted_words()?;
        let body = match r.u32()? {
            MARKER_PLAIN => {
                let count = r.remaining() / 4;
                EventBody::Plain(r.words(count)?)
            }
            MARKER_BITS => {
                let unpacked_bytes = r.u32()?;
                if unpacked_bytes % 4 != 0 {
                    return Err(EvwireError::malformed(
                        "event-fill",
                        format!("unpacked size {} is not word aligned", unpacked_bytes),
                    ));
                }
                let len = r.u32()? as usize;
                EventBody::Bits { unpacked_bytes, stream: r.bytes(len)?.to_vec() }
            }
            marker => return Err(DecodeError::BadMarker { marker }.into()),
        };
        r.finish()?;
        Ok(Self { sort_key, struct_index, ntuple_index, raw, body })
    }
}
