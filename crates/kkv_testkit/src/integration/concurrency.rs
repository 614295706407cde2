//! Concurrent search ordering and failure handling.

use kkv_core::{
    BuildingSegment, BuiltSegment, BuiltSegmentWriter, CoreError, KkvIterator, KkvReader, PKey,
    ResultBuffer, SKey, SearchRequest, SegmentConfig, SegmentId, SegmentSet, ValueLayout,
};
use kkv_storage::InMemoryBackend;
use crate::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn writer(id: u64, layout: ValueLayout, rows: &[(u64, &[u8], u64)]) -> BuiltSegmentWriter {
    let mut writer = BuiltSegmentWriter::new(SegmentConfig::new(SegmentId::new(id)).layout(layout));
    for &(skey, value, ts) in rows {
        put(&mut writer, 1, skey, value, ts);
    }
    writer
}

/// Three built segments where the newest is the slowest to read.
fn slow_newest(layout: ValueLayout) -> SegmentSet {
    let delays = [(3, 40), (2, 15), (1, 0)];
    let rows: [&[(u64, &[u8], u64)]; 3] = [
        &[(1, b"c1", 300)],
        &[(1, b"b1", 200), (2, b"b2", 200)],
        &[(3, b"a3", 100), (1, b"a1", 100)],
    ];
    let mut set = SegmentSet::new();
    for ((id, millis), rows) in delays.into_iter().zip(rows) {
        let segment = seal_slow(writer(id, layout, rows), Duration::from_millis(millis)).unwrap();
        set.push_built(Arc::new(segment));
    }
    set
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn merge_order_ignores_task_completion_order() {
    let reader = KkvReader::default();
    let request = SearchRequest::new(PKey::new(1), 1_000);

    for layout in LAYOUTS {
        let segments = slow_newest(layout);
        let blocking = drain_blocking(&reader, &segments, &request, 2).unwrap();
        let summary: Vec<_> = blocking
            .iter()
            .map(|e| (e.skey.as_u64(), e.timestamp, e.value.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, 300, b"c1".to_vec()),
                (2, 200, b"b2".to_vec()),
                (3, 100, b"a3".to_vec()),
            ]
        );

        for _ in 0..3 {
            let concurrent = drain_concurrent(&reader, &segments, &request, 2).await.unwrap();
            assert_eq!(concurrent, blocking, "{layout:?}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_segment_gets_a_task() {
    let reader = KkvReader::default();
    let segments = slow_newest(ValueLayout::inline_variable());
    let mut iter = KkvIterator::Concurrent(
        reader.search_concurrent(&segments, &SearchRequest::new(PKey::new(1), 1_000)),
    );
    let drained = drain_iter(&mut iter, 8).await.unwrap();

    assert_eq!(drained.metrics.tasks_spawned, 3);
    assert_eq!(drained.metrics.built_segments_searched, 3);
    assert!(!drained.pkey_tombstone);
}

/// A building segment with one row over a built segment whose reads can
/// be made to fail.
fn failing_set(layout: ValueLayout, switch: &FailSwitch) -> SegmentSet {
    let building = Arc::new(BuildingSegment::new(SegmentId::new(2)));
    building.put(PKey::new(1), SKey::new(9), b"nw".to_vec(), 50, None);
    let built = seal_failing(writer(1, layout, &[(1, b"a1", 10), (2, b"a2", 10)]), switch).unwrap();
    SegmentSet::new()
        .with_building(building)
        .with_built(Arc::new(built))
}

#[test]
fn blocking_io_error_empties_buffer_and_ends_search() {
    for layout in LAYOUTS {
        let switch = FailSwitch::new();
        let segments = failing_set(layout, &switch);
        switch.arm();

        let reader = KkvReader::default();
        let mut iter = reader.search_blocking(&segments, &SearchRequest::new(PKey::new(1), 100));
        let mut buf = ResultBuffer::new(16);

        let err = iter.batch_get(&mut buf).unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)), "{layout:?}: {err}");
        assert!(buf.is_empty());
        assert!(!iter.is_valid());

        switch.disarm();
        iter.batch_get(&mut buf).unwrap();
        assert!(buf.is_empty());
    }
}

#[tokio::test]
async fn concurrent_io_error_empties_buffer_and_ends_search() {
    for layout in LAYOUTS {
        let switch = FailSwitch::new();
        let segments = failing_set(layout, &switch);
        switch.arm();

        let reader = KkvReader::default();
        let mut iter = KkvIterator::Concurrent(
            reader.search_concurrent(&segments, &SearchRequest::new(PKey::new(1), 100)),
        );
        let mut buf = ResultBuffer::new(16);

        let err = iter.batch_get(&mut buf).await.unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)), "{layout:?}: {err}");
        assert!(buf.is_empty());
        assert!(!iter.is_valid());
    }
}

#[test]
fn value_store_failure_surfaces_after_rows_are_decoded() {
    let switch = FailSwitch::new();
    let mut data = InMemoryBackend::new();
    let mut values = InMemoryBackend::new();
    writer(1, ValueLayout::offset_variable(), &[(1, b"a1", 10)])
        .finish(&mut data, Some(&mut values))
        .unwrap();
    let segment = BuiltSegment::open(
        Arc::new(data),
        Some(Arc::new(FailingBackend::new(values, switch.clone()))),
    )
    .unwrap();
    let segments = SegmentSet::new().with_built(Arc::new(segment));
    let reader = KkvReader::default();
    let request = SearchRequest::new(PKey::new(1), 100);

    let rows = drain_blocking(&reader, &segments, &request, 4).unwrap();
    assert_eq!(rows[0].value, b"a1");

    switch.arm();
    let mut iter = reader.search_blocking(&segments, &request);
    let mut buf = ResultBuffer::new(4);
    assert!(iter.batch_get(&mut buf).is_err());
    assert!(buf.is_empty());
    assert!(!iter.is_valid());
}
