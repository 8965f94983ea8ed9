//! Property-based tests for part planning

use proptest::prelude::*;
use partwise_core::*;

proptest! {
    #[test]
    fn props_parts_tile_the_source(
        size in 0u64..(64 * 1024 * 1024),
        part_size in (8 * 1024u64)..(8 * 1024 * 1024),
    ) {
        let config = UploadConfig {
            part_size: Some(part_size),
            min_part_size: 1,
            ..UploadConfig::default()
        };
        let plan = config.plan(Some(size)).unwrap();
        let count = plan.part_count().unwrap();

        // Ranges are contiguous, non-overlapping and cover exactly `size` bytes
        let mut expected_offset = 0u64;
        for part_number in 1..=count {
            let range = plan.range(part_number).unwrap();
            prop_assert_eq!(range.part_number, part_number);
            prop_assert_eq!(range.offset, expected_offset);
            prop_assert!(range.len <= part_size);
            if part_number < count {
                prop_assert_eq!(range.len, part_size);
            }
            expected_offset += range.len;
        }
        prop_assert_eq!(expected_offset, size);
        prop_assert!(plan.range(count + 1).is_none());
    }

    #[test]
    fn props_derived_part_size_respects_part_limit(size in 0u64..MAX_OBJECT_SIZE) {
        let plan = UploadConfig::default().plan(Some(size)).unwrap();
        prop_assert!(plan.part_count().unwrap() <= MAX_PARTS_COUNT);
        prop_assert!(plan.part_size() >= DEFAULT_PART_SIZE);
    }
}
