//! Record field metadata

use serde::{Deserialize, Serialize};

use super::{SLOT_SIZE, ScalarType};

/// Description of one field in a record layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name, unique within its record
    pub name: String,
    /// Slot type of every element
    pub scalar: ScalarType,
    /// Byte offset within the record
    pub offset: u32,
    /// Total size in bytes (elements * 4)
    pub size: u32,
    /// Name of the field holding this array's runtime element count
    pub controlling: Option<String>,
    /// Upper bound on the value of this field when it controls arrays
    pub max_count: Option<u32>,
}

impl Field {
    /// Number of 4-byte elements in the field.
    pub fn len(&self) -> u32 {
        self.size / SLOT_SIZE
    }

    /// Whether the field has no elements.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// First byte past the end of the field.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Whether this field bounds one or more arrays.
    pub fn is_controlling(&self) -> bool {
        self.max_count.is_some()
    }

    /// Whether this field's length is given by another field at runtime.
    pub fn is_controlled(&self) -> bool {
        self.controlling.is_some()
    }

    /// Whether the byte ranges of the two fields intersect.
    pub fn overlaps(&self, other: &Field) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Offset of element `index`.
    pub fn element_offset(&self, index: u32) -> u32 {
        self.offset + index * SLOT_SIZE
    }
}
