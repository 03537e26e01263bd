//! Layout checksum carried by the setup-done message.

use md5::{Digest, Md5};

use super::StructureDescriptor;

/// Fold a descriptor's field set into a 32-bit checksum.
///
/// Covers every property that affects the wire layout: names, type codes,
/// placement, control relations, limits and the record size. The value is
/// the first four bytes of an MD5 digest over a canonical listing.
pub fn layout_checksum(descriptor: &StructureDescriptor) -> u32 {
    let mut hasher = Md5::new();
    hasher.update(descriptor.record_size().to_be_bytes());
    for field in descriptor.fields() {
        hasher.update((field.name.len() as u32).to_be_bytes());
        hasher.update(field.name.as_bytes());
        hasher.update(field.scalar.code().to_be_bytes());
        hasher.update(field.offset.to_be_bytes());
        hasher.update(field.size.to_be_bytes());
        let controlling = field.controlling.as_deref().unwrap_or("");
        hasher.update((controlling.len() as u32).to_be_bytes());
        hasher.update(controlling.as_bytes());
        hasher.update(field.max_count.unwrap_or(u32::MAX).to_be_bytes());
    }
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_descriptor;
    use crate::types::ScalarType;

    #[test]
    fn checksum_is_stable_for_equal_layouts() {
        assert_eq!(layout_checksum(&sample_descriptor()), layout_checksum(&sample_descriptor()));
    }

    #[test]
    fn checksum_sees_type_limit_and_name_changes() {
        let base = layout_checksum(&sample_descriptor());

        let mut renamed = StructureDescriptor::new("sample");
        renamed.describe(0, 4, ScalarType::Int32, "B", None, None).unwrap();
        renamed.describe(4, 4, ScalarType::Uint32, "N", None, Some(5)).unwrap();
        renamed.describe(8, 20, ScalarType::Uint32, "C", Some("N"), None).unwrap();

        let mut limit = StructureDescriptor::new("sample");
        limit.describe(0, 4, ScalarType::Int32, "A", None, None).unwrap();
        limit.describe(4, 4, ScalarType::Uint32, "N", None, Some(6)).unwrap();
        limit.describe(8, 20, ScalarType::Uint32, "C", Some("N"), None).unwrap();

        let mut typed = StructureDescriptor::new("sample");
        typed.describe(0, 4, ScalarType::Float32, "A", None, None).unwrap();
        typed.describe(4, 4, ScalarType::Uint32, "N", None, Some(5)).unwrap();
        typed.describe(8, 20, ScalarType::Uint32, "C", Some("N"), None).unwrap();

        assert_ne!(base, layout_checksum(&renamed));
        assert_ne!(base, layout_checksum(&limit));
        assert_ne!(base, layout_checksum(&typed));
    }
}
