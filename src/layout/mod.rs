//! Record layouts and their compiled forms.
//!
//! A [`StructureDescriptor`] is the authoritative description of one record
//! type. From it the crate derives everything the hot path needs:
//!
//! - [`PackList`]: flat instruction list walked by the wire codec
//! - [`MapList`]: projection between a producer and a consumer layout
//! - [`EventBuffer`]: a cleared record buffer with typed slot access
//! - [`layout_checksum`]: the 32-bit fingerprint verified at setup
//!
//! ## Usage Example
//!
//! ```rust
//! use evwire::layout::{EventBuffer, PackEntry, StructureDescriptor, match_layouts};
//! use evwire::types::ScalarType;
//!
//! let mut d = StructureDescriptor::new("hits");
//! d.describe(0, 4, ScalarType::Uint32, "n", None, Some(4)).unwrap();
//! d.describe(4, 16, ScalarType::Float32, "energy", Some("n"), None).unwrap();
//!
//! let list = d.compile();
//! assert!(matches!(list.entries()[0], PackEntry::Loop { max_repeats: 4, .. }));
//! assert!(match_layouts(&d, &d).is_exact());
//!
//! let mut event = EventBuffer::new(&d);
//! event.set(&d, "n", 0, 1u32).unwrap();
//! event.set(&d, "energy", 0, 3.5f32).unwrap();
//! assert!(event.get::<f32>(&d, "energy", 1).unwrap().is_nan());
//! ```

mod checksum;
mod descriptor;
mod event_buffer;
mod matcher;
mod pack_list;

pub use checksum::layout_checksum;
pub use descriptor::StructureDescriptor;
pub use event_buffer::EventBuffer;
pub use matcher::{MapEntry, MapList, match_layouts};
pub use pack_list::{PackEntry, PackList};
