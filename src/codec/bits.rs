//! Bit-compacted encoding.
//!
//! The input is a buffer of 4-byte big-endian slots. Each emitted entry is
//! zero or more continuation bytes followed by one terminal byte:
//!
//! ```text
//! continuation  1ddddddd                  delta bits at shift 2, 9, 16, ...
//! tag 0         000vvvvv                  value 0..=31
//! tag 1         001vvvvv vvvvvvvv         13-bit value, high bits first
//! tag 2         010ddddd v v v v          delta bits, 32-bit value BE
//! tag 3         011zdddd                  delta bits, z=1 zero, z=0 quiet NaN
//! ```
//!
//! The delta is the number of bytes skipped since the previous slot; skipped
//! bytes decode as zero. Runs of two or more zero slots in front of a non-zero
//! slot are folded into its delta.

use crate::types::{NAN_BITS, SLOT_SIZE};
use crate::{DecodeError, Result};

const CONTINUATION: u8 = 0x80;
const TAG_SHIFT: u8 = 5;
const ZERO_FLAG: u8 = 0x10;
const FIRST_SHIFT: u32 = 2;
const TAG1_LIMIT: u32 = 1 << 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Small,
    Medium,
    Literal,
    Special,
}

impl Tag {
    fn for_value(value: u32) -> Self {
        match value {
            0 | NAN_BITS => Tag::Special,
            1..=31 => Tag::Small,
            v if v < TAG1_LIMIT => Tag::Medium,
            _ => Tag::Literal,
        }
    }

    /// Delta bits the terminal byte itself can carry.
    fn delta_capacity(self) -> u32 {
        match self {
            Tag::Small | Tag::Medium => 0,
            Tag::Literal => 5,
            Tag::Special => 4,
        }
    }

    fn bits(self) -> u8 {
        (match self {
            Tag::Small => 0,
            Tag::Medium => 1,
            Tag::Literal => 2,
            Tag::Special => 3,
        }) << TAG_SHIFT
    }
}

/// Compact a buffer of big-endian 32-bit slots.
///
/// Any trailing partial slot is ignored; callers pass slot-aligned buffers.
pub fn encode_bits(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() / 2 + 8);
    let mut zeros = 0u32;

    for slot in src.chunks_exact(SLOT_SIZE as usize) {
        let value = u32::from_be_bytes([slot[0], slot[1], slot[2], slot[3]]);
        if value == 0 {
            zeros += 1;
            continue;
        }
        let skipped = match zeros {
            0 => 0,
            1 => {
                push_entry(&mut out, 0, 0);
                0
            }
            run => run,
        };
        zeros = 0;
        push_entry(&mut out, skipped, value);
    }

    for _ in 0..zeros {
        push_entry(&mut out, 0, 0);
    }
    out
}

/// Emit one entry; `skipped` is the number of zero slots folded into its delta.
fn push_entry(out: &mut Vec<u8>, skipped: u32, value: u32) {
    let tag = Tag::for_value(value);
    let mut delta = skipped;
    while delta >> tag.delta_capacity() != 0 {
        out.push(CONTINUATION | (delta & 0x7f) as u8);
        delta >>= 7;
    }
    let delta = delta as u8;

    match tag {
        Tag::Small => out.push(tag.bits() | value as u8),
        Tag::Medium => {
            out.push(tag.bits() | (value >> 8) as u8);
            out.push(value as u8);
        }
        Tag::Literal => {
            out.push(tag.bits() | delta);
            out.extend_from_slice(&value.to_be_bytes());
        }
        Tag::Special => {
            let zero = if value == 0 { ZERO_FLAG } else { 0 };
            out.push(tag.bits() | zero | delta);
        }
    }
}

/// Expand a compacted stream into `dst`, which must be exactly the original size.
///
/// Returns [`DecodeError::TruncatedOrCorrupt`] if the stream ends early, runs
/// past `dst`, or stops short of filling it.
pub fn decode_bits(stream: &[u8], dst: &mut [u8]) -> Result<()> {
    let corrupt = |position: usize| DecodeError::TruncatedOrCorrupt { position };
    let mut running = 0usize;
    let mut cursor = 0usize;

    while cursor < stream.len() {
        let mut delta = 0u64;
        let mut shift = FIRST_SHIFT;
        let mut byte = stream[cursor];
        while byte & CONTINUATION != 0 {
            delta |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if shift > 40 {
                return Err(corrupt(cursor).into());
            }
            cursor += 1;
            byte = *stream.get(cursor).ok_or(corrupt(cursor))?;
        }
        cursor += 1;

        let value = match byte >> TAG_SHIFT {
            0 => u32::from(byte & 0x1f),
            1 => {
                let low = *stream.get(cursor).ok_or(corrupt(cursor))?;
                cursor += 1;
                (u32::from(byte & 0x1f) << 8) | u32::from(low)
            }
            2 => {
                delta |= u64::from(byte & 0x1f) << shift;
                let bytes = stream.get(cursor..cursor + 4).ok_or(corrupt(cursor))?;
                cursor += 4;
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            _ => {
                delta |= u64::from(byte & 0x0f) << shift;
                if byte & ZERO_FLAG != 0 { 0 } else { NAN_BITS }
            }
        };

        let position = usize::try_from(delta)
            .ok()
            .and_then(|d| running.checked_add(d))
            .filter(|p| p.checked_add(4).is_some_and(|end| end <= dst.len()))
            .ok_or(corrupt(cursor))?;
        dst[running..position].fill(0);
        dst[position..position + 4].copy_from_slice(&value.to_be_bytes());
        running = position + 4;
    }

    if running != dst.len() {
        return Err(corrupt(stream.len()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn slots(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn mixed_slots_use_expected_tags() {
        let src = slots(&[0, NAN_BITS, 17, 0x1234_5678]);
        let stream = encode_bits(&src);
        assert_eq!(stream, [0x70, 0x60, 0x11, 0x40, 0x12, 0x34, 0x56, 0x78]);

        let mut dst = vec![0xFFu8; 16];
        decode_bits(&stream, &mut dst).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn medium_values_take_two_bytes() {
        let stream = encode_bits(&slots(&[8191, 32]));
        assert_eq!(stream, [0x3f, 0xff, 0x20, 0x20]);
    }

    #[test]
    fn zero_runs_fold_into_the_next_delta() {
        // Three zeros then a literal: delta 12 bytes = 3 slots fits the tag 2 byte.
        let src = slots(&[0, 0, 0, 0xdead_beef]);
        let stream = encode_bits(&src);
        assert_eq!(stream, [0x43, 0xde, 0xad, 0xbe, 0xef]);

        // A small value cannot carry delta bits, so a continuation byte precedes it.
        let src = slots(&[0, 0, 5]);
        let stream = encode_bits(&src);
        assert_eq!(stream, [0x82, 0x05]);

        for src in [slots(&[0, 0, 0, 0xdead_beef]), slots(&[0, 0, 5])] {
            let mut dst = vec![0xAAu8; src.len()];
            decode_bits(&encode_bits(&src), &mut dst).unwrap();
            assert_eq!(dst, src);
        }
    }

    #[test]
    fn long_zero_runs_use_several_continuation_bytes() {
        let mut values = vec![0u32; 5000];
        values.push(NAN_BITS);
        let src = slots(&values);
        let stream = encode_bits(&src);
        assert!(stream.len() < 8);
        let mut dst = vec![0u8; src.len()];
        decode_bits(&stream, &mut dst).unwrap();
        assert_eq!(dst, src);
    }

    #[test]
    fn trailing_zeros_are_explicit() {
        let stream = encode_bits(&slots(&[3, 0, 0]));
        assert_eq!(stream, [0x03, 0x70, 0x70]);
    }

    #[test]
    fn empty_buffer_is_empty_stream() {
        assert!(encode_bits(&[]).is_empty());
        decode_bits(&[], &mut []).unwrap();
    }

    #[test]
    fn overrun_and_underrun_are_corrupt() {
        let stream = encode_bits(&slots(&[1, 2, 3]));
        let mut short = vec![0u8; 8];
        let mut long = vec![0u8; 16];
        assert!(decode_bits(&stream, &mut short).is_err());
        assert!(decode_bits(&stream, &mut long).is_err());
        assert!(decode_bits(&[0x80, 0x80], &mut long).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip_restores_every_slot(
            values in prop::collection::vec(
                prop_oneof![Just(0u32), Just(NAN_BITS), 0u32..64, 0u32..10_000, any::<u32>()],
                0..200,
            )
        ) {
            let src = slots(&values);
            let stream = encode_bits(&src);
            let mut dst = vec![0x5Au8; src.len()];
            decode_bits(&stream, &mut dst).unwrap();
            prop_assert_eq!(dst, src);
        }

        #[test]
        fn prop_every_truncation_is_rejected(
            values in prop::collection::vec(any::<u32>(), 1..64),
            cut in any::<prop::sample::Index>(),
        ) {
            let src = slots(&values);
            let stream = encode_bits(&src);
            let keep = cut.index(stream.len());
            let mut dst = vec![0u8; src.len()];
            let err = decode_bits(&stream[..keep], &mut dst).unwrap_err();
            prop_assert!(
                matches!(err, crate::EvwireError::Decode(DecodeError::TruncatedOrCorrupt { .. })),
                "unexpected error {:?}",
                err
            );
        }
    }
}
