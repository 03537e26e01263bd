//! Layout fixtures shared by unit tests and benches
//!
//! The fixed descriptors mirror the layouts used throughout the test suite; the
//! proptest strategies generate arbitrary valid layouts for property tests.

#![cfg(any(test, feature = "benchmark"))]

use crate::layout::{EventBuffer, StructureDescriptor};
use crate::types::{Field, ScalarType, read_bits, write_bits};

/// `A: int32 @0`, `N: uint32 @4 (max 5)`, `C: uint32[5] @8 controlled by N`; 28 bytes.
pub fn sample_descriptor() -> StructureDescriptor {
    let mut d = StructureDescriptor::new("sample");
    build(&mut d, 0, 4, ScalarType::Int32, "A", None, None);
    build(&mut d, 4, 4, ScalarType::Uint32, "N", None, Some(5));
    build(&mut d, 8, 20, ScalarType::Uint32, "C", Some("N"), None);
    d
}

/// Detector-style layout: a trigger header and `hits` parallel arrays of up to `hits` entries.
pub fn hits_descriptor(hits: u32) -> StructureDescriptor {
    let width = hits * 4;
    let mut d = StructureDescriptor::new("hits");
    build(&mut d, 0, 4, ScalarType::Uint32, "run", None, None);
    build(&mut d, 4, 4, ScalarType::Uint32, "event", None, None);
    build(&mut d, 8, 16, ScalarType::Float32, "trigger", None, None);
    build(&mut d, 24, 4, ScalarType::Uint32, "nhits", None, Some(hits));
    build(&mut d, 28, width, ScalarType::Uint32, "channel", Some("nhits"), None);
    build(&mut d, 28 + width, width, ScalarType::Float32, "energy", Some("nhits"), None);
    build(&mut d, 28 + 2 * width, width, ScalarType::Int32, "time", Some("nhits"), None);
    d
}

/// Fill every slot of a record from a word source, keeping control counts in range.
///
/// Controlling slots take `word % (limit + 1)`; controlled elements beyond that
/// count stay clear, as a producer would leave them.
pub fn fill_event(descriptor: &StructureDescriptor, words: &[u32]) -> EventBuffer {
    let mut event = EventBuffer::new(descriptor);
    let mut source = words.iter().copied().cycle().chain(std::iter::repeat(0));
    let mut next = move || source.next().unwrap_or(0);

    for field in descriptor.fields() {
        if field.is_controlled() {
            continue;
        }
        if field.is_controlling() {
            let count = next() % (descriptor.loop_limit(field) + 1);
            let _ = write_bits(event.as_bytes_mut(), field.offset, count);
            for array in descriptor.controlled_by(&field.name) {
                for i in 0..count {
                    let _ = write_bits(event.as_bytes_mut(), array.element_offset(i), next());
                }
            }
            continue;
        }
        for i in 0..field.len() {
            let _ = write_bits(event.as_bytes_mut(), field.element_offset(i), next());
        }
    }
    event
}

/// Runtime element count of `field` in `event`, honouring its controlling slot.
pub fn live_len(descriptor: &StructureDescriptor, event: &EventBuffer, field: &Field) -> u32 {
    match field.controlling.as_deref().and_then(|name| descriptor.field(name)) {
        Some(control) => read_bits(event.as_bytes(), control.offset).unwrap_or(0),
        None => field.len(),
    }
}

fn build(
    d: &mut StructureDescriptor,
    offset: u32,
    size: u32,
    scalar: ScalarType,
    name: &str,
    controlling: Option<&str>,
    max_count: Option<u32>,
) {
    if let Err(err) = d.describe(offset, size, scalar, name, controlling, max_count) {
        panic!("fixture layout rejected: {err}");
    }
}

#[cfg(test)]
pub use strategies::*;
