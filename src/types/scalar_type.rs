//! Scalar slot type definitions

use serde::{Deserialize, Serialize};

/// Quiet-NaN bit pattern used as the "absent" marker for float slots.
pub const NAN_BITS: u32 = 0x7fc0_0000;

/// Width in bytes of every slot in a record.
pub const SLOT_SIZE: u32 = 4;

/// Supported record slot types.
///
/// Every slot is 32 bits wide; the type only decides how the bits are
/// interpreted and which clear pattern marks the slot as unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// 32-bit signed integer
    Int32,
    /// 32-bit unsigned integer
    Uint32,
    /// 32-bit IEEE float
    Float32,
}

impl ScalarType {
    /// Returns the size in bytes of this type.
    pub const fn size(&self) -> u32 {
        SLOT_SIZE
    }

    /// Wire code used in create-field messages.
    pub const fn code(&self) -> u32 {
        match self {
            ScalarType::Int32 => 1,
            ScalarType::Uint32 => 2,
            ScalarType::Float32 => 3,
        }
    }

    /// Inverse of [`ScalarType::code`].
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ScalarType::Int32),
            2 => Some(ScalarType::Uint32),
            3 => Some(ScalarType::Float32),
            _ => None,
        }
    }

    /// Bit pattern written into a slot of this type when a record is cleared.
    pub const fn clear_bits(&self) -> u32 {
        match self {
            ScalarType::Float32 => NAN_BITS,
            ScalarType::Int32 | ScalarType::Uint32 => 0,
        }
    }

    /// Whether a slot of this type can hold an element count.
    pub const fn is_integer(&self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Uint32)
    }
}

/// Runtime value read from a slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int32(i32),
    Uint32(u32),
    Float32(f32),
}

impl Value {
    /// Interpret raw slot bits according to `scalar`.
    pub fn from_bits(scalar: ScalarType, bits: u32) -> Self {
        match scalar {
            ScalarType::Int32 => Value::Int32(bits as i32),
            ScalarType::Uint32 => Value::Uint32(bits),
            ScalarType::Float32 => Value::Float32(f32::from_bits(bits)),
        }
    }

    /// Raw slot bits for this value.
    pub fn to_bits(self) -> u32 {
        match self {
            Value::Int32(v) => v as u32,
            Value::Uint32(v) => v,
            Value::Float32(v) => v.to_bits(),
        }
    }

    /// Whether the value is the clear pattern of its type.
    pub fn is_absent(self) -> bool {
        match self {
            Value::Float32(v) => v.is_nan(),
            Value::Int32(v) => v == 0,
            Value::Uint32(v) => v == 0,
        }
    }
}
