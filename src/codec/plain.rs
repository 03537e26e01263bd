//! Plain-packed encoding: one 32-bit word per live slot, in pack-list order.

use tracing::trace;

use crate::layout::{EventBuffer, PackEntry, PackList};
use crate::types::{read_bits, write_bits};
use crate::{DecodeError, Result};

/// Append the live slots of `event` to `out`.
///
/// Loop entries emit their runtime count followed by that many tuples. If any
/// count exceeds its loop's limit, `out` is left exactly as it was.
pub fn encode_plain(list: &PackList, event: &EventBuffer, out: &mut Vec<u32>) -> Result<()> {
    let start = out.len();
    let result = pack_into(list, event.as_bytes(), out);
    if result.is_err() {
        out.truncate(start);
    }
    result
}

fn pack_into(list: &PackList, data: &[u8], out: &mut Vec<u32>) -> Result<()> {
    for entry in list.entries() {
        match entry {
            PackEntry::Scalar { offset } => out.push(read_bits(data, *offset)?),
            PackEntry::Loop { offset, max_repeats, repeat_width, child_offsets } => {
                let count = read_bits(data, *offset)?;
                if count > *max_repeats {
                    return Err(DecodeError::ControlOutOfRange {
                        offset: *offset,
                        value: count,
                        max: *max_repeats,
                    }
                    .into());
                }
                out.push(count);
                for child in &child_offsets[..(count * repeat_width) as usize] {
                    out.push(read_bits(data, *child)?);
                }
            }
        }
    }
    Ok(())
}

/// Decode `words` into `event`, which is cleared first.
///
/// Every word must be consumed: running out early is [`DecodeError::ShortMessage`],
/// leftovers are [`DecodeError::TrailingData`].
pub fn decode_plain(list: &PackList, words: &[u32], event: &mut EventBuffer) -> Result<()> {
    event.clear();
    let data = event.as_bytes_mut();
    let mut cursor = 0usize;
    let mut next = || {
        let word = words.get(cursor).copied().ok_or(DecodeError::ShortMessage { consumed: cursor });
        cursor += 1;
        word
    };

    for entry in list.entries() {
        match entry {
            PackEntry::Scalar { offset } => write_bits(data, *offset, next()?)?,
            PackEntry::Loop { offset, max_repeats, repeat_width, child_offsets } => {
                let count = next()?;
                if count > *max_repeats {
                    return Err(DecodeError::ControlOutOfRange {
                        offset: *offset,
                        value: count,
                        max: *max_repeats,
                    }
                    .into());
                }
                write_bits(data, *offset, count)?;
                for child in &child_offsets[..(count * repeat_width) as usize] {
                    write_bits(data, *child, next()?)?;
                }
            }
        }
    }

    let consumed = cursor;
    if consumed < words.len() {
        return Err(DecodeError::TrailingData { remaining: words.len() - consumed }.into());
    }
    trace!(words = consumed, "Decoded plain-packed event");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EvwireError;
    use crate::test_utils::{arb_event, sample_descriptor};
    use proptest::prelude::*;

    fn decode_err(err: EvwireError) -> DecodeError {
        match err {
            EvwireError::Decode(inner) => inner,
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn sample_event_roundtrips_and_leaves_tail_clear() {
        let d = sample_descriptor();
        let list = d.compile();
        let mut event = EventBuffer::new(&d);
        event.set(&d, "A", 0, 7i32).unwrap();
        event.set(&d, "N", 0, 3u32).unwrap();
        event.set_all(&d, "C", &[10u32, 20, 30]).unwrap();

        let mut words = Vec::new();
        encode_plain(&list, &event, &mut words).unwrap();
        assert_eq!(words, [7, 3, 10, 20, 30]);

        let mut decoded = EventBuffer::new(&d);
        decoded.as_bytes_mut().fill(0xEE);
        decode_plain(&list, &words, &mut decoded).unwrap();
        assert_eq!(decoded.get::<i32>(&d, "A", 0).unwrap(), 7);
        assert_eq!(decoded.get::<u32>(&d, "N", 0).unwrap(), 3);
        for (i, expected) in [10u32, 20, 30, 0, 0].into_iter().enumerate() {
            assert_eq!(decoded.get::<u32>(&d, "C", i as u32).unwrap(), expected);
        }
    }

    #[test]
    fn control_out_of_range_appends_nothing() {
        let d = sample_descriptor();
        let list = d.compile();
        let mut event = EventBuffer::new(&d);
        event.set(&d, "N", 0, 6u32).unwrap();

        let mut words = vec![0xdead_beef];
        let err = decode_err(encode_plain(&list, &event, &mut words).unwrap_err());
        assert_eq!(err, DecodeError::ControlOutOfRange { offset: 4, value: 6, max: 5 });
        assert_eq!(words, [0xdead_beef]);
    }

    #[test]
    fn short_and_trailing_input_are_rejected() {
        let d = sample_descriptor();
        let list = d.compile();
        let mut event = EventBuffer::new(&d);

        let short = decode_err(decode_plain(&list, &[7, 3, 10], &mut event).unwrap_err());
        assert_eq!(short, DecodeError::ShortMessage { consumed: 3 });

        let trailing = decode_err(decode_plain(&list, &[7, 0, 1, 2], &mut event).unwrap_err());
        assert_eq!(trailing, DecodeError::TrailingData { remaining: 2 });

        let oversized = decode_err(decode_plain(&list, &[7, 9], &mut event).unwrap_err());
        assert!(matches!(oversized, DecodeError::ControlOutOfRange { value: 9, .. }));
    }

    proptest! {
        #[test]
        fn prop_plain_roundtrip_is_exact((descriptor, event) in arb_event()) {
            let list = descriptor.compile();
            let mut words = Vec::new();
            encode_plain(&list, &event, &mut words).unwrap();
            prop_assert!(words.len() <= list.slot_count());

            let mut decoded = EventBuffer::new(&descriptor);
            decode_plain(&list, &words, &mut decoded).unwrap();
            prop_assert_eq!(decoded.as_bytes(), event.as_bytes());
        }
    }
}
