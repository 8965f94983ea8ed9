//! Finalize order must not depend on the order parts complete in

mod common;

use bytes::Bytes;
use common::*;
use partwise_client::{BytesSource, UploadInput};
use partwise_core::Key;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn finalize_lists_parts_ascending(
        delays in prop::collection::vec(0u64..8, 1..12),
        queue_size in 1usize..5,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let part_count = delays.len();
        let (completed, object) = runtime.block_on(async {
            let remote = MockRemote::new();
            for (index, delay) in delays.iter().enumerate() {
                remote.delay_part(index as u32 + 1, Duration::from_millis(*delay));
            }
            let uploader = uploader(&remote, memory_cache(), small_parts(3, queue_size));
            let data = Bytes::from(pattern(part_count * 3));
            let source = Arc::new(BytesSource::new(data.clone()));

            uploader
                .upload(UploadInput::new(Key::new("ordered").unwrap(), source))
                .unwrap()
                .result()
                .await
                .unwrap();

            let stored = remote.object("public/ordered").unwrap();
            assert!(remote.max_in_flight() <= queue_size);
            (remote.completed(), stored == data)
        });

        let expected: Vec<u32> = (1..=part_count as u32).collect();
        prop_assert_eq!(completed.len(), 1);
        prop_assert_eq!(&completed[0].1, &expected);
        prop_assert!(object);
    }
}
