//! Per-event wire codec.
//!
//! Events are first plain-packed: the pack list is walked in order and every
//! live slot becomes one 32-bit word. The bit-compacted encoding then
//! optionally squeezes the big-endian plain words, exploiting that most slots
//! of a zero-suppressed record are zero or NaN.
//!
//! ```rust
//! use evwire::codec::{decode_bits, decode_plain, encode_bits, encode_plain};
//! use evwire::layout::{EventBuffer, StructureDescriptor};
//! use evwire::types::ScalarType;
//!
//! let mut d = StructureDescriptor::new("r");
//! d.describe(0, 16, ScalarType::Uint32, "adc", None, None).unwrap();
//! let list = d.compile();
//!
//! let mut event = EventBuffer::new(&d);
//! event.set(&d, "adc", 2, 900u32).unwrap();
//!
//! let mut words = Vec::new();
//! encode_plain(&list, &event, &mut words).unwrap();
//! let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
//! let stream = encode_bits(&bytes);
//! assert!(stream.len() < bytes.len());
//!
//! let mut unpacked = vec![0u8; bytes.len()];
//! decode_bits(&stream, &mut unpacked).unwrap();
//! assert_eq!(unpacked, bytes);
//!
//! let mut decoded = EventBuffer::new(&d);
//! decode_plain(&list, &words, &mut decoded).unwrap();
//! assert_eq!(decoded, event);
//! ```

mod bits;
mod plain;

use serde::{Deserialize, Serialize};

pub use bits::{decode_bits, encode_bits};
pub use plain::{decode_plain, encode_plain};

/// Payload encoding selected by the event-fill marker word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// One word per live slot.
    #[default]
    Plain,
    /// Plain words run through the bit compactor.
    Bits,
}
