//! Owned, shareable view of one decoded event.
//!
//! Frames carry the record bytes and the consumer layout, so fields can be
//! looked up by name after the session has moved on to the next event.

use std::sync::Arc;

use crate::layout::{EventBuffer, StructureDescriptor};
use crate::types::{Field, SlotValue, Value, read_bits};

/// A self-contained event supporting by-name lookups.
#[derive(Debug, Clone)]
pub struct EventFrame {
    data: Arc<[u8]>,
    sort_key: Arc<[u32]>,
    raw: Arc<[u32]>,
    sequence: u64,
    layout: Arc<StructureDescriptor>,
}

impl EventFrame {
    pub fn new(
        event: &EventBuffer,
        layout: &Arc<StructureDescriptor>,
        sort_key: &[u32],
        raw: &[u32],
        sequence: u64,
    ) -> Self {
        Self {
            data: Arc::from(event.as_bytes()),
            sort_key: Arc::from(sort_key),
            raw: Arc::from(raw),
            sequence,
            layout: Arc::clone(layout),
        }
    }

    /// Field metadata if the layout has it.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.layout.field(name)
    }

    /// Typed lookup of one element.
    /// Returns None if the field is missing, the type differs or the index is out of range.
    pub fn get<T: SlotValue>(&self, name: &str, index: u32) -> Option<T> {
        T::read(&self.data, self.field(name)?, index).ok()
    }

    /// The live elements of an array: controlled arrays stop at their count.
    pub fn array<T: SlotValue>(&self, name: &str) -> Option<Vec<T>> {
        let field = self.field(name)?;
        (0..self.live_len(field)).map(|i| T::read(&self.data, field, i).ok()).collect()
    }

    pub fn value(&self, name: &str, index: u32) -> Option<Value> {
        let field = self.field(name)?;
        if index >= field.len() {
            return None;
        }
        let bits = read_bits(&self.data, field.element_offset(index)).ok()?;
        Some(Value::from_bits(field.scalar, bits))
    }

    pub fn f32(&self, name: &str) -> Option<f32> {
        self.get(name, 0)
    }
    pub fn i32(&self, name: &str) -> Option<i32> {
        self.get(name, 0)
    }
    pub fn u32(&self, name: &str) -> Option<u32> {
        self.get(name, 0)
    }

    /// Position of this event in the session, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn sort_key(&self) -> &[u32] {
        &self.sort_key
    }

    pub fn raw(&self) -> &[u32] {
        &self.raw
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn layout(&self) -> &StructureDescriptor {
        &self.layout
    }

    fn live_len(&self, field: &Field) -> u32 {
        let control = field.controlling.as_deref().and_then(|name| self.layout.field(name));
        match control {
            Some(control) => read_bits(&self.data, control.offset).map_or(0, |count| count.min(field.len())),
            None => field.len(),
        }
    }
}
