//! Fixed-size record buffers with a zero/NaN clear pattern.

use super::StructureDescriptor;
use crate::types::{SlotValue, Value, read_bits};
use crate::{EvwireError, Result};

/// One record's worth of bytes, reset to the layout's clear pattern before each fill.
///
/// Float slots clear to quiet NaN and everything else to zero, so a slot the
/// producer did not set is distinguishable from one set to zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBuffer {
    data: Vec<u8>,
    template: Vec<u8>,
}

impl EventBuffer {
    /// Allocate a cleared buffer sized to the descriptor's record.
    pub fn new(descriptor: &StructureDescriptor) -> Self {
        let mut template = vec![0u8; descriptor.record_size() as usize];
        for field in descriptor.fields() {
            let pattern = field.scalar.clear_bits().to_le_bytes();
            let start = field.offset as usize;
            for slot in template[start..start + field.size as usize].chunks_exact_mut(4) {
                slot.copy_from_slice(&pattern);
            }
        }
        Self { data: template.clone(), template }
    }

    /// Reset every slot to its clear value.
    pub fn clear(&mut self) {
        self.data.copy_from_slice(&self.template);
    }

    /// Raw record bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw record bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the record has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read element `index` of field `name`.
    pub fn get<T: SlotValue>(
        &self,
        descriptor: &StructureDescriptor,
        name: &str,
        index: u32,
    ) -> Result<T> {
        let field = lookup(descriptor, name)?;
        T::read(&self.data, field, index)
    }

    /// Write element `index` of field `name`.
    pub fn set<T: SlotValue>(
        &mut self,
        descriptor: &StructureDescriptor,
        name: &str,
        index: u32,
        value: T,
    ) -> Result<()> {
        let field = lookup(descriptor, name)?;
        value.write(&mut self.data, field, index)
    }

    /// Write consecutive elements of field `name` starting at element 0.
    pub fn set_all<T: SlotValue>(
        &mut self,
        descriptor: &StructureDescriptor,
        name: &str,
        values: &[T],
    ) -> Result<()> {
        let field = lookup(descriptor, name)?;
        for (index, value) in values.iter().enumerate() {
            value.write(&mut self.data, field, index as u32)?;
        }
        Ok(())
    }

    /// Read element `index` of field `name` as a tagged value.
    pub fn value(&self, descriptor: &StructureDescriptor, name: &str, index: u32) -> Result<Value> {
        let field = lookup(descriptor, name)?;
        if index >= field.len() {
            return Err(EvwireError::malformed("slot access", format!("index {} out of range", index)));
        }
        let bits = read_bits(&self.data, field.element_offset(index))?;
        Ok(Value::from_bits(field.scalar, bits))
    }
}

fn lookup<'a>(descriptor: &'a StructureDescriptor, name: &str) -> Result<&'a crate::types::Field> {
    descriptor
        .field(name)
        .ok_or_else(|| EvwireError::malformed("slot access", format!("no field named '{}'", name)))
}
