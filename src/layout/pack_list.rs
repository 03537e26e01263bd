//! Pack-list compilation.
//!
//! A pack list is the flat instruction stream the codec walks for every event.
//! Controlled arrays are folded into the loop entry of their controlling field,
//! with every element offset pre-expanded for the worst-case repeat count, so
//! packing needs no per-field lookups at runtime.

use serde::{Deserialize, Serialize};

use super::StructureDescriptor;
use crate::types::SLOT_SIZE;
use crate::{EvwireError, Result};

/// Marker bit set on the first word of a loop entry in the wire form.
const LOOP_FLAG: u32 = 0x8000_0000;

/// One compiled instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackEntry {
    /// One 32-bit slot at `offset`.
    Scalar { offset: u32 },
    /// A controlling slot followed by up to `max_repeats` tuples of `repeat_width` slots.
    Loop { offset: u32, max_repeats: u32, repeat_width: u32, child_offsets: Vec<u32> },
}

impl PackEntry {
    /// Offset of the slot read or written first.
    pub fn offset(&self) -> u32 {
        match self {
            PackEntry::Scalar { offset } | PackEntry::Loop { offset, .. } => *offset,
        }
    }

    /// Worst-case number of slots this entry occupies on the wire.
    pub fn max_slots(&self) -> usize {
        match self {
            PackEntry::Scalar { .. } => 1,
            PackEntry::Loop { child_offsets, .. } => 1 + child_offsets.len(),
        }
    }
}

/// Compiled form of a [`StructureDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackList {
    entries: Vec<PackEntry>,
    record_size: u32,
}

impl PackList {
    /// Compile a descriptor in a single pass over its sorted fields.
    pub fn compile(descriptor: &StructureDescriptor) -> Self {
        let mut entries = Vec::with_capacity(descriptor.field_count());

        for field in descriptor.fields() {
            if field.is_controlled() {
                continue;
            }
            if !field.is_controlling() {
                entries.extend((0..field.len()).map(|i| PackEntry::Scalar {
                    offset: field.element_offset(i),
                }));
                continue;
            }

            let arrays: Vec<_> = descriptor.controlled_by(&field.name).collect();
            let max_repeats = descriptor.loop_limit(field);
            let repeat_width = arrays.len() as u32;
            let mut child_offsets = Vec::with_capacity((max_repeats * repeat_width) as usize);
            for repeat in 0..max_repeats {
                child_offsets.extend(arrays.iter().map(|a| a.element_offset(repeat)));
            }

            entries.push(PackEntry::Loop {
                offset: field.offset,
                max_repeats,
                repeat_width,
                child_offsets,
            });
        }

        Self { entries, record_size: descriptor.record_size() }
    }

    /// Compiled entries in pack order.
    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    /// Record size the offsets refer to.
    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    /// Worst-case number of 32-bit words one packed event can occupy.
    pub fn slot_count(&self) -> usize {
        self.entries.iter().map(PackEntry::max_slots).sum()
    }

    /// Wire form used by the array-offsets message.
    pub fn to_words(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(self.slot_count() + 2 * self.entries.len());
        for entry in &self.entries {
            match entry {
                PackEntry::Scalar { offset } => words.push(*offset),
                PackEntry::Loop { offset, max_repeats, repeat_width, child_offsets } => {
                    words.push(LOOP_FLAG | offset);
                    words.push(*max_repeats);
                    words.push(*repeat_width);
                    words.extend_from_slice(child_offsets);
                }
            }
        }
        words
    }

    /// Parse the wire form, checking every offset against `record_size`.
    pub fn from_words(words: &[u32], record_size: u32) -> Result<Self> {
        let bad = |details: String| EvwireError::malformed("array offsets", details);
        let check = |offset: u32| {
            if offset % SLOT_SIZE != 0 || offset.saturating_add(SLOT_SIZE) > record_size {
                Err(bad(format!("offset {:#x} outside record of {} bytes", offset, record_size)))
            } else {
                Ok(offset)
            }
        };

        let mut entries = Vec::new();
        let mut cursor = 0;
        while let Some(&word) = words.get(cursor) {
            if word & LOOP_FLAG == 0 {
                entries.push(PackEntry::Scalar { offset: check(word)? });
                cursor += 1;
                continue;
            }
            let [max_repeats, repeat_width] = match words.get(cursor + 1..cursor + 3) {
                Some(&[m, w]) => [m, w],
                _ => return Err(bad("loop header truncated".to_string())),
            };
            let children = (max_repeats as usize)
                .checked_mul(repeat_width as usize)
                .ok_or_else(|| bad("loop size overflows".to_string()))?;
            let start = cursor + 3;
            let child_offsets = words
                .get(start..start + children)
                .ok_or_else(|| bad("loop children truncated".to_string()))?
                .iter()
                .map(|&o| check(o))
                .collect::<Result<Vec<_>>>()?;
            entries.push(PackEntry::Loop {
                offset: check(word & !LOOP_FLAG)?,
                max_repeats,
                repeat_width,
                child_offsets,
            });
            cursor = start + children;
        }

        Ok(Self { entries, record_size })
    }
}
