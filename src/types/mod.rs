//! Core types for record layout description.
//!
//! This module provides the building blocks shared by the layout compiler,
//! the wire codec and the consumer façade.
//!
//! ## Architecture
//!
//! - [`ScalarType`] is the closed set of 32-bit slot types with their clear patterns
//! - [`Field`] describes one named field (scalar or array) at a byte offset
//! - [`SlotValue`] provides typed, bounds-checked reads and writes of record slots
//! - [`Value`] is a runtime value tagged with its slot type
//! - [`UpdateRate`] bounds the delivery rate of latest-event streams
//!
//! ## Usage Example
//!
//! ```rust
//! use evwire::types::{Field, ScalarType, SlotValue};
//!
//! let field = Field {
//!     name: "Energy".to_string(),
//!     scalar: ScalarType::Float32,
//!     offset: 0,
//!     size: 8,
//!     controlling: None,
//!     max_count: None,
//! };
//!
//! let mut data = vec![0u8; 8];
//! 12.5f32.write(&mut data, &field, 1).unwrap();
//! assert_eq!(f32::read(&data, &field, 1).unwrap(), 12.5);
//! assert!(u32::read(&data, &field, 0).is_err());
//! ```

mod field;
mod scalar_type;
mod slot_value;
mod update_rate;

pub use field::Field;
pub use scalar_type::{NAN_BITS, SLOT_SIZE, ScalarType, Value};
pub use slot_value::SlotValue;
pub(crate) use slot_value::{read_bits, write_bits};
pub use update_rate::UpdateRate;
