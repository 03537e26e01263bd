//! Cross-layout field matching.
//!
//! A producer and a consumer may describe the same record differently: fields
//! added, removed, moved or arrays with different limits. Matching is done once
//! at setup and yields a [`MapList`], a flat projection table applied to every
//! decoded event.
//!
//! Fields match by name, identical slot type, identical controlling-field name
//! and identical controlling role. Consumer fields without a match are dropped
//! from the table and keep their clear value; absence is not an error.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EventBuffer, StructureDescriptor};
use crate::types::{Field, read_bits, write_bits};
use crate::{DecodeError, Result};

/// One projection step from the producer layout into the consumer layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapEntry {
    /// Copy one slot.
    Copy { src: u32, dst: u32 },
    /// Copy a controlling slot and the element pairs of its matched arrays.
    ///
    /// `pairs` holds `dst_max.min(src_max)` repeats of `width` pairs each.
    Loop {
        src: u32,
        dst: u32,
        src_max: u32,
        dst_max: u32,
        clamped: bool,
        width: u32,
        pairs: Vec<(u32, u32)>,
    },
}

/// Projection table between two layouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapList {
    entries: Vec<MapEntry>,
    exact: bool,
}

impl MapList {
    /// Projection steps in consumer field order.
    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// Whether both layouts are byte-identical, allowing direct decoding.
    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// Copy the matched slots of `src` (producer layout) into `dst` (consumer layout).
    ///
    /// `dst` should be cleared beforehand; unmatched slots are left untouched.
    pub fn project(&self, src: &EventBuffer, dst: &mut EventBuffer) -> Result<()> {
        let from = src.as_bytes();
        let to = dst.as_bytes_mut();
        for entry in &self.entries {
            match entry {
                MapEntry::Copy { src, dst } => write_bits(to, *dst, read_bits(from, *src)?)?,
                MapEntry::Loop { src, dst, src_max, dst_max, width, pairs, .. } => {
                    let count = read_bits(from, *src)?;
                    if count > *src_max {
                        return Err(DecodeError::ControlOutOfRange {
                            offset: *src,
                            value: count,
                            max: *src_max,
                        }
                        .into());
                    }
                    let repeats = count.min(*dst_max);
                    write_bits(to, *dst, repeats)?;
                    for (s, d) in &pairs[..(repeats * width) as usize] {
                        write_bits(to, *d, read_bits(from, *s)?)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Build the projection from `producer` into `consumer`.
pub fn match_layouts(producer: &StructureDescriptor, consumer: &StructureDescriptor) -> MapList {
    let mut entries = Vec::with_capacity(consumer.field_count());
    let mut exact = producer.record_size() == consumer.record_size()
        && producer.field_count() == consumer.field_count();

    for wanted in consumer.fields() {
        let Some(found) = find_match(producer, wanted) else {
            debug!(field = %wanted.name, "Consumer field has no producer counterpart");
            exact = false;
            continue;
        };
        exact &= found.offset == wanted.offset
            && found.size == wanted.size
            && found.max_count == wanted.max_count;

        if wanted.is_controlled() {
            // Emitted with the loop of the controlling field.
            continue;
        }

        if !wanted.is_controlling() {
            entries.extend(
                (0..found.len().min(wanted.len()))
                    .map(|i| MapEntry::Copy { src: found.element_offset(i), dst: wanted.element_offset(i) }),
            );
            continue;
        }

        let src_max = producer.loop_limit(found);
        let dst_max = consumer.loop_limit(wanted);
        let arrays: Vec<(&Field, &Field)> = consumer
            .controlled_by(&wanted.name)
            .filter_map(|array| find_match(producer, array).map(|source| (source, array)))
            .collect();
        let repeats = src_max.min(dst_max);
        let mut pairs = Vec::with_capacity((repeats as usize) * arrays.len());
        for repeat in 0..repeats {
            pairs.extend(
                arrays.iter().map(|(s, d)| (s.element_offset(repeat), d.element_offset(repeat))),
            );
        }
        entries.push(MapEntry::Loop {
            src: found.offset,
            dst: wanted.offset,
            src_max,
            dst_max,
            clamped: dst_max < src_max,
            width: arrays.len() as u32,
            pairs,
        });
    }

    debug!(entries = entries.len(), exact, "Matched producer and consumer layouts");
    MapList { entries, exact }
}

fn find_match<'a>(producer: &'a StructureDescriptor, wanted: &Field) -> Option<&'a Field> {
    producer.field(&wanted.name).filter(|found| {
        found.scalar == wanted.scalar
            && found.controlling == wanted.controlling
            && found.is_controlling() == wanted.is_controlling()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arb_descriptor, sample_descriptor};
    use crate::types::{NAN_BITS, ScalarType};
    use proptest::prelude::*;

    fn consumer_layout() -> StructureDescriptor {
        // Reordered, C shortened to 3, A retyped, extra float field.
        let mut d = StructureDescriptor::new("consumer");
        d.describe(0, 4, ScalarType::Uint32, "N", None, Some(3)).unwrap();
        d.describe(4, 12, ScalarType::Uint32, "C", Some("N"), None).unwrap();
        d.describe(16, 4, ScalarType::Float32, "A", None, None).unwrap();
        d.describe(20, 4, ScalarType::Float32, "extra", None, None).unwrap();
        d
    }

    #[test]
    fn self_match_is_exact_identity() {
        let d = sample_descriptor();
        let map = match_layouts(&d, &d);
        assert!(map.is_exact());
        assert_eq!(
            map.entries(),
            &[
                MapEntry::Copy { src: 0, dst: 0 },
                MapEntry::Loop {
                    src: 4,
                    dst: 4,
                    src_max: 5,
                    dst_max: 5,
                    clamped: false,
                    width: 1,
                    pairs: vec![(8, 8), (12, 12), (16, 16), (20, 20), (24, 24)],
                },
            ]
        );
    }

    #[test]
    fn type_mismatch_drops_field_and_clamps_loop() {
        let map = match_layouts(&sample_descriptor(), &consumer_layout());
        assert!(!map.is_exact());
        assert_eq!(
            map.entries(),
            &[MapEntry::Loop {
                src: 4,
                dst: 0,
                src_max: 5,
                dst_max: 3,
                clamped: true,
                width: 1,
                pairs: vec![(8, 4), (12, 8), (16, 12)],
            }]
        );
    }

    #[test]
    fn projection_clamps_counts_and_keeps_clear_values() {
        let producer = sample_descriptor();
        let consumer = consumer_layout();
        let map = match_layouts(&producer, &consumer);

        let mut src = EventBuffer::new(&producer);
        src.set(&producer, "A", 0, 7i32).unwrap();
        src.set(&producer, "N", 0, 5u32).unwrap();
        src.set_all(&producer, "C", &[10u32, 20, 30, 40, 50]).unwrap();

        let mut dst = EventBuffer::new(&consumer);
        map.project(&src, &mut dst).unwrap();

        assert_eq!(dst.get::<u32>(&consumer, "N", 0).unwrap(), 3);
        for (i, expected) in [10u32, 20, 30].into_iter().enumerate() {
            assert_eq!(dst.get::<u32>(&consumer, "C", i as u32).unwrap(), expected);
        }
        assert_eq!(dst.get::<f32>(&consumer, "A", 0).unwrap().to_bits(), NAN_BITS);
        assert!(dst.get::<f32>(&consumer, "extra", 0).unwrap().is_nan());
    }

    #[test]
    fn projection_rejects_out_of_range_source_count() {
        let d = sample_descriptor();
        let map = match_layouts(&d, &d);
        let mut src = EventBuffer::new(&d);
        src.set(&d, "N", 0, 9u32).unwrap();
        let mut dst = EventBuffer::new(&d);
        let err = map.project(&src, &mut dst).unwrap_err();
        assert!(matches!(
            err,
            crate::EvwireError::Decode(DecodeError::ControlOutOfRange { value: 9, max: 5, .. })
        ));
    }

    #[test]
    fn controlling_name_must_agree() {
        let mut producer = StructureDescriptor::new("p");
        producer.describe(0, 4, ScalarType::Uint32, "N", None, Some(2)).unwrap();
        producer.describe(4, 4, ScalarType::Uint32, "M", None, Some(2)).unwrap();
        producer.describe(8, 8, ScalarType::Uint32, "C", Some("M"), None).unwrap();

        let mut consumer = StructureDescriptor::new("c");
        consumer.describe(0, 4, ScalarType::Uint32, "N", None, Some(2)).unwrap();
        consumer.describe(4, 8, ScalarType::Uint32, "C", Some("N"), None).unwrap();

        let map = match_layouts(&producer, &consumer);
        assert!(matches!(&map.entries()[0], MapEntry::Loop { width: 0, .. }));
        assert_eq!(map.entries().len(), 1);
    }

    proptest! {
        #[test]
        fn prop_self_match_is_always_exact(descriptor in arb_descriptor()) {
            let map = match_layouts(&descriptor, &descriptor);
            prop_assert!(map.is_exact());
            for entry in map.entries() {
                match entry {
                    MapEntry::Copy { src, dst } => prop_assert_eq!(src, dst),
                    MapEntry::Loop { src, dst, clamped, pairs, .. } => {
                        prop_assert_eq!(src, dst);
                        prop_assert!(!clamped);
                        prop_assert!(pairs.iter().all(|(s, d)| s == d));
                    }
                }
            }
        }
    }
}
