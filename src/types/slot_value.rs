//! Typed access to record slots

use super::{Field, ScalarType};
use crate::{DecodeError, EvwireError};

/// Trait for types that can be read from and written to a record slot.
///
/// Record buffers store slots little-endian; the wire codec converts to
/// network order on its own.
pub trait SlotValue: Sized + Copy {
    /// Slot type this Rust type maps to.
    const SCALAR: ScalarType;

    /// Build the value from raw slot bits.
    fn from_bits(bits: u32) -> Self;

    /// Raw slot bits for the value.
    fn to_bits(self) -> u32;

    /// Read element `index` of `field` from `data`.
    fn read(data: &[u8], field: &Field, index: u32) -> crate::Result<Self> {
        check_type::<Self>(field)?;
        let bits = read_bits(data, element(field, index)?)?;
        Ok(Self::from_bits(bits))
    }

    /// Write element `index` of `field` into `data`.
    fn write(self, data: &mut [u8], field: &Field, index: u32) -> crate::Result<()> {
        check_type::<Self>(field)?;
        write_bits(data, element(field, index)?, self.to_bits())
    }
}

impl SlotValue for i32 {
    const SCALAR: ScalarType = ScalarType::Int32;

    fn from_bits(bits: u32) -> Self {
        bits as i32
    }

    fn to_bits(self) -> u32 {
        self as u32
    }
}

impl SlotValue for u32 {
    const SCALAR: ScalarType = ScalarType::Uint32;

    fn from_bits(bits: u32) -> Self {
        bits
    }

    fn to_bits(self) -> u32 {
        self
    }
}

impl SlotValue for f32 {
    const SCALAR: ScalarType = ScalarType::Float32;

    fn from_bits(bits: u32) -> Self {
        f32::from_bits(bits)
    }

    fn to_bits(self) -> u32 {
        f32::to_bits(self)
    }
}

fn check_type<T: SlotValue>(field: &Field) -> crate::Result<()> {
    if field.scalar != T::SCALAR {
        return Err(EvwireError::malformed(
            "slot access",
            format!("field '{}' is {:?}, not {:?}", field.name, field.scalar, T::SCALAR),
        ));
    }
    Ok(())
}

fn element(field: &Field, index: u32) -> crate::Result<u32> {
    if index >= field.len() {
        return Err(EvwireError::malformed(
            "slot access",
            format!("index {} out of range for '{}' ({} elements)", index, field.name, field.len()),
        ));
    }
    Ok(field.element_offset(index))
}

/// Read the raw bits of the slot at `offset`.
pub(crate) fn read_bits(data: &[u8], offset: u32) -> crate::Result<u32> {
    let start = offset as usize;
    let bytes = data
        .get(start..start + 4)
        .ok_or(DecodeError::ShortMessage { consumed: start / 4 })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Write raw bits into the slot at `offset`.
pub(crate) fn write_bits(data: &mut [u8], offset: u32, bits: u32) -> crate::Result<()> {
    let start = offset as usize;
    let slot = data
        .get_mut(start..start + 4)
        .ok_or(DecodeError::ShortMessage { consumed: start / 4 })?;
    slot.copy_from_slice(&bits.to_le_bytes());
    Ok(())
}
