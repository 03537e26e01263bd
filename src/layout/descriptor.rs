//! Structure descriptors: the ordered field list of one record type.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::PackList;
use crate::types::{Field, SLOT_SIZE, ScalarType};
use crate::{DescribeError, Result};

/// Ordered, validated set of fields describing one record layout.
///
/// Fields are kept sorted by offset. A descriptor is built once during setup
/// and treated as immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDescriptor {
    name: String,
    record_size: u32,
    fields: Vec<Field>,
}

impl StructureDescriptor {
    /// Create an empty descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), record_size: 0, fields: Vec::new() }
    }

    /// Create an empty descriptor with a fixed minimum record size.
    pub fn with_record_size(name: impl Into<String>, record_size: u32) -> Self {
        Self { name: name.into(), record_size, fields: Vec::new() }
    }

    /// Add a field to the layout.
    ///
    /// `controlling_name` names an already described field whose runtime value is the
    /// element count of this array; `max_count` marks this field as controlling and
    /// bounds its value.
    pub fn describe(
        &mut self,
        offset: u32,
        size: u32,
        scalar: ScalarType,
        name: &str,
        controlling_name: Option<&str>,
        max_count: Option<u32>,
    ) -> Result<(), DescribeError> {
        if size == 0 || offset % SLOT_SIZE != 0 || size % SLOT_SIZE != 0 {
            return Err(DescribeError::BadSize { name: name.to_string(), offset, size });
        }
        if offset.checked_add(size).is_none() {
            return Err(DescribeError::BadSize { name: name.to_string(), offset, size });
        }
        if self.field(name).is_some() {
            return Err(DescribeError::NameCollision { name: name.to_string() });
        }

        let field = Field {
            name: name.to_string(),
            scalar,
            offset,
            size,
            controlling: controlling_name.filter(|c| !c.is_empty()).map(str::to_string),
            max_count,
        };

        if field.is_controlling() && (field.size != SLOT_SIZE || !scalar.is_integer()) {
            return Err(DescribeError::BadControlLimit {
                name: field.name,
                controlling: name.to_string(),
                reason: "a controlling field must be a single integer slot".to_string(),
            });
        }

        if let Some(controlling) = &field.controlling {
            self.check_control(&field, controlling)?;
        }

        // Single positional search keeps the list sorted; only the neighbours can overlap.
        let position = self.fields.partition_point(|f| f.offset < offset);
        let neighbours = [position.checked_sub(1), Some(position)];
        for other in neighbours.into_iter().flatten().filter_map(|i| self.fields.get(i)) {
            if other.overlaps(&field) {
                return Err(DescribeError::Overlap {
                    name: field.name,
                    offset,
                    size,
                    other: other.name.clone(),
                });
            }
        }

        trace!(name, offset, size, ?scalar, "Described field");
        self.record_size = self.record_size.max(field.end());
        self.fields.insert(position, field);
        Ok(())
    }

    fn check_control(&self, field: &Field, controlling: &str) -> Result<(), DescribeError> {
        let Some(control) = self.field(controlling) else {
            return Err(DescribeError::DanglingControl {
                name: field.name.clone(),
                controlling: controlling.to_string(),
            });
        };
        let bad_limit = |reason: String| DescribeError::BadControlLimit {
            name: field.name.clone(),
            controlling: controlling.to_string(),
            reason,
        };
        if field.is_controlling() {
            return Err(bad_limit("a controlled array cannot control other arrays".to_string()));
        }
        match control.max_count {
            None => Err(bad_limit("controlling field has no max_count".to_string())),
            Some(max) if max < field.len() => Err(bad_limit(format!(
                "max_count {} is smaller than the array length {}",
                max,
                field.len()
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Grow the record to `record_size` bytes. Shrinking is rejected.
    pub fn resize(&mut self, record_size: u32) -> Result<(), DescribeError> {
        if record_size < self.record_size {
            return Err(DescribeError::Shrink {
                name: self.name.clone(),
                current: self.record_size,
                requested: record_size,
            });
        }
        if record_size % SLOT_SIZE != 0 {
            return Err(DescribeError::BadSize {
                name: self.name.clone(),
                offset: 0,
                size: record_size,
            });
        }
        self.record_size = record_size;
        Ok(())
    }

    /// Compile the layout into a pack list.
    pub fn compile(&self) -> PackList {
        PackList::compile(self)
    }

    /// Record type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes of one record.
    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    /// Fields sorted by offset.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Arrays bounded by the controlling field `name`, in offset order.
    pub fn controlled_by<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.controlling.as_deref() == Some(name))
    }

    /// Effective repeat limit of a controlling field: its `max_count`, bounded by
    /// the shortest array it controls.
    pub fn loop_limit(&self, control: &Field) -> u32 {
        let max_count = control.max_count.unwrap_or(0);
        self.controlled_by(&control.name).map(Field::len).fold(max_count, u32::min)
    }

    /// Number of described fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_descriptor;
    use proptest::prelude::*;

    #[test]
    fn fields_stay_sorted_by_offset() {
        let mut d = StructureDescriptor::new("r");
        d.describe(8, 4, ScalarType::Int32, "c", None, None).unwrap();
        d.describe(0, 4, ScalarType::Int32, "a", None, None).unwrap();
        d.describe(4, 4, ScalarType::Float32, "b", None, None).unwrap();
        let names: Vec<_> = d.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(d.record_size(), 12);
    }

    #[test]
    fn name_collision_is_rejected() {
        let mut d = StructureDescriptor::new("r");
        d.describe(0, 4, ScalarType::Int32, "a", None, None).unwrap();
        let err = d.describe(4, 4, ScalarType::Int32, "a", None, None).unwrap_err();
        assert!(matches!(err, DescribeError::NameCollision { .. }));
    }

    #[test]
    fn overlap_is_rejected_on_both_sides() {
        let mut d = StructureDescriptor::new("r");
        d.describe(8, 8, ScalarType::Int32, "mid", None, None).unwrap();
        let before = d.describe(4, 8, ScalarType::Int32, "before", None, None).unwrap_err();
        let after = d.describe(12, 4, ScalarType::Int32, "after", None, None).unwrap_err();
        assert!(matches!(before, DescribeError::Overlap { ref other, .. } if other == "mid"));
        assert!(matches!(after, DescribeError::Overlap { ref other, .. } if other == "mid"));
        d.describe(16, 4, ScalarType::Int32, "after", None, None).unwrap();
    }

    #[test]
    fn dangling_control_is_rejected() {
        let mut d = StructureDescriptor::new("r");
        let err = d.describe(4, 20, ScalarType::Uint32, "C", Some("N"), None).unwrap_err();
        assert!(matches!(err, DescribeError::DanglingControl { .. }));
    }

    #[test]
    fn empty_controlling_name_means_uncontrolled() {
        let mut d = StructureDescriptor::new("r");
        d.describe(0, 8, ScalarType::Uint32, "C", Some(""), None).unwrap();
        assert!(!d.fields()[0].is_controlled());
    }

    #[test]
    fn control_limits_are_checked() {
        let mut d = StructureDescriptor::new("r");
        d.describe(0, 4, ScalarType::Uint32, "plain", None, None).unwrap();
        d.describe(4, 4, ScalarType::Uint32, "N", None, Some(3)).unwrap();
        let unset = d.describe(8, 12, ScalarType::Uint32, "A", Some("plain"), None).unwrap_err();
        let small = d.describe(8, 20, ScalarType::Uint32, "B", Some("N"), None).unwrap_err();
        assert!(matches!(unset, DescribeError::BadControlLimit { .. }));
        assert!(matches!(small, DescribeError::BadControlLimit { .. }));
        d.describe(8, 12, ScalarType::Uint32, "C", Some("N"), None).unwrap();
    }

    #[test]
    fn controlling_field_must_be_integer_scalar() {
        let mut d = StructureDescriptor::new("r");
        let float = d.describe(0, 4, ScalarType::Float32, "N", None, Some(2)).unwrap_err();
        let wide = d.describe(0, 8, ScalarType::Uint32, "M", None, Some(2)).unwrap_err();
        assert!(matches!(float, DescribeError::BadControlLimit { .. }));
        assert!(matches!(wide, DescribeError::BadControlLimit { .. }));
    }

    #[test]
    fn misaligned_fields_are_rejected() {
        let mut d = StructureDescriptor::new("r");
        assert!(matches!(
            d.describe(2, 4, ScalarType::Int32, "a", None, None),
            Err(DescribeError::BadSize { .. })
        ));
        assert!(matches!(
            d.describe(0, 0, ScalarType::Int32, "b", None, None),
            Err(DescribeError::BadSize { .. })
        ));
    }

    #[test]
    fn resize_only_grows() {
        let mut d = sample_descriptor();
        let size = d.record_size();
        d.resize(size + 16).unwrap();
        assert_eq!(d.record_size(), size + 16);
        assert!(matches!(d.resize(4), Err(DescribeError::Shrink { .. })));
    }

    proptest! {
        #[test]
        fn prop_accepted_fields_never_overlap(
            candidates in prop::collection::vec((0u32..64, 1u32..4), 1..40)
        ) {
            let mut d = StructureDescriptor::new("r");
            for (i, (slot, len)) in candidates.into_iter().enumerate() {
                let _ = d.describe(slot * 4, len * 4, ScalarType::Uint32, &format!("f{i}"), None, None);
            }
            for pair in d.fields().windows(2) {
                prop_assert!(pair[0].end() <= pair[1].offset);
            }
        }
    }
}
