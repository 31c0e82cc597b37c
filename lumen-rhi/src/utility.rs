use std::ops::{Bound, RangeBounds};
use ash::vk;

macro_rules! normalize_range_function {
    ($unsigned:ty) => {
        $crate::paste! {
            /// Resolve `bounds` against `size` into `(offset, length)`, or `None` when out of range.
            #[allow(dead_code)]
            pub(crate) fn [<normalize_range_ $unsigned>]<R: RangeBounds<$unsigned>>(
                bounds: R,
                size: $unsigned,
            ) -> Option<($unsigned, $unsigned)> {
                let start = match bounds.start_bound() {
                    Bound::Included(&v) => v,
                    Bound::Excluded(&v) => v.checked_add(1)?,
                    Bound::Unbounded => 0,
                };
                let end_exclusive = match bounds.end_bound() {
                    Bound::Included(&v) => v.checked_add(1)?,
                    Bound::Excluded(&v) => v,
                    Bound::Unbounded => size,
                };

                if start > end_exclusive || end_exclusive > size {
                    return None;
                }

                Some((start, end_exclusive - start))
            }
        }
    };
}

normalize_range_function!(u32);
normalize_range_function!(u64);
normalize_range_function!(usize);

/// Find a suitable memory type index.
pub(crate) fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let memory_type = memory_properties.memory_types[i as usize];
        (type_filter & (1 << i)) != 0 && memory_type.property_flags.contains(properties)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ranges() {
        assert_eq!(normalize_range_u64(.., 64), Some((0, 64)));
        assert_eq!(normalize_range_u64(16..32, 64), Some((16, 16)));
        assert_eq!(normalize_range_u64(16..=31, 64), Some((16, 16)));
        assert_eq!(normalize_range_u64(60..80, 64), None);
        assert_eq!(normalize_range_usize(8.., 8), Some((8, 0)));
    }
}
