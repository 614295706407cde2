//! End-to-end search behavior over building and built segments.

use kkv_core::{
    BufferState, BuildingSegment, IndexConfig, KkvReader, Locator, PKey, ResultBuffer, SKey,
    SearchMode, SearchRequest, SegmentConfig, SegmentId, SegmentSet, Timestamp, ValueEntry,
};
use crate::prelude::*;
use std::sync::Arc;

fn request(pkey: u64) -> SearchRequest {
    SearchRequest::new(PKey::new(pkey), SCENARIO_NOW).ttl(SCENARIO_TTL)
}

fn building(id: u64, rows: &[(u64, &[u8], Timestamp)]) -> Arc<BuildingSegment> {
    let segment = BuildingSegment::new(SegmentId::new(id));
    for &(skey, value, ts) in rows {
        segment.put(PKey::new(1), SKey::new(skey), value.to_vec(), ts, None);
    }
    Arc::new(segment)
}

#[tokio::test]
async fn scenario_in_every_layout_and_mode() {
    for layout in LAYOUTS {
        let harness = SearchHarness::new(scenario(layout));

        let rows = harness.blocking(&request(1), 16);
        let summary: Vec<_> = rows
            .iter()
            .map(|e| (e.skey.as_u64(), e.timestamp, e.duplicate, e.value.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (2, 800, false, b"v4".to_vec()),
                (2, 500, true, b"v3".to_vec()),
                (1, 100, false, b"v1".to_vec()),
            ],
            "{layout:?}"
        );
        assert!(rows.iter().all(|e| !e.deleted));

        for pkey in [1, 2, 3, 4] {
            harness.agreed(&request(pkey), 2).await;
        }
    }
}

#[tokio::test]
async fn byte_limit_pages_alike_in_every_layout() {
    let row = std::mem::size_of::<ValueEntry>() + FIXED_VALUE_LEN as usize;
    let request = SearchRequest::new(PKey::new(1), 100);

    for layout in LAYOUTS {
        let config = SegmentConfig::new(SegmentId::new(1)).layout(layout);
        let segment = built_segment(config, |w| {
            for skey in 1..=5 {
                put(w, 1, skey, &[skey as u8; FIXED_VALUE_LEN as usize], 10);
            }
        });
        let harness = SearchHarness::new(SegmentSet::new().with_built(segment));
        let buffer = || ResultBuffer::new(100).with_byte_limit(2 * row);

        assert_eq!(harness.page_sizes(&request, buffer()), vec![2, 2, 1], "{layout:?}");
        assert_eq!(
            harness.concurrent_page_sizes(&request, buffer()).await,
            vec![2, 2, 1],
            "{layout:?}"
        );
        // Values are resolved in full however the batches split.
        let rows = harness.blocking(&request, 2);
        assert!(rows.iter().all(|e| e.value == [e.skey.as_u64() as u8; 2]), "{layout:?}");
    }
}

#[tokio::test]
async fn pkey_tombstones_in_both_realms() {
    let reader = KkvReader::new(IndexConfig::new().search_mode(SearchMode::Concurrent));
    let segments = scenario(LAYOUTS[2]);

    for pkey in [2, 4] {
        let mut iter = reader.search(&segments, request(pkey)).unwrap();
        let drained = drain_iter(&mut iter, 4).await.unwrap();
        assert!(drained.rows.is_empty(), "pkey {pkey}");
        assert!(drained.pkey_tombstone, "pkey {pkey}");
    }

    // Pkey 4 is deleted in segment 2, so segment 1 is never scheduled.
    let mut iter = reader.search(&segments, request(4)).unwrap();
    let drained = drain_iter(&mut iter, 4).await.unwrap();
    assert_eq!(drained.metrics.tasks_spawned, 1);

    // Pkey 2 is deleted in the building segment; no task at all.
    let mut iter = reader.search(&segments, request(2)).unwrap();
    let drained = drain_iter(&mut iter, 4).await.unwrap();
    assert_eq!(drained.metrics.tasks_spawned, 0);
    assert_eq!(drained.metrics.built_segments_searched, 0);
}

#[test]
fn capacity_one_pages_through_four_rows() {
    let segments = SegmentSet::new().with_building(building(
        1,
        &[(1, b"a", 10), (2, b"b", 11), (3, b"c", 12), (4, b"d", 13)],
    ));
    let reader = KkvReader::default();
    let mut iter = reader.search_blocking(&segments, &SearchRequest::new(PKey::new(1), 100));
    let mut buf = ResultBuffer::new(1);

    for (call, skey) in (1..=4).zip(1u64..) {
        assert!(iter.is_valid(), "call {call}");
        iter.batch_get(&mut buf).unwrap();
        assert_eq!(buf.len(), 1, "call {call}");
        assert_eq!(buf.entries()[0].skey, SKey::new(skey));
        if call < 4 {
            assert_eq!(buf.state(), BufferState::Full);
        }
    }
    assert!(!iter.is_valid());
    assert_eq!(buf.state(), BufferState::Exhausted);

    iter.batch_get(&mut buf).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn quota_counts_only_visible_rows() {
    let reader = KkvReader::default();
    let segments = scenario(LAYOUTS[0]);

    let mut iter = reader.search_blocking(&segments, &request(1).quota(1));
    let mut buf = ResultBuffer::new(16);
    iter.batch_get(&mut buf).unwrap();
    let summary: Vec<_> = buf.entries().iter().map(|e| (e.skey.as_u64(), e.timestamp)).collect();
    assert_eq!(summary, vec![(2, 800)]);
    assert_eq!(buf.state(), BufferState::QuotaReached);
    assert!(!iter.is_valid());

    iter.batch_get(&mut buf).unwrap();
    assert!(buf.is_empty());

    // The duplicate does not use up the quota.
    let rows = drain_blocking(&reader, &segments, &request(1).quota(2), 16).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().filter(|e| !e.duplicate).count(), 2);
}

#[test]
fn quota_survives_page_boundaries() {
    let segments = SegmentSet::new().with_building(building(
        1,
        &[(1, b"a", 10), (2, b"b", 11), (3, b"c", 12), (4, b"d", 13)],
    ));
    let reader = KkvReader::default();
    let mut iter =
        reader.search_blocking(&segments, &SearchRequest::new(PKey::new(1), 100).quota(3));
    let drained = drain_sync(&mut iter, 2).unwrap();

    let skeys: Vec<u64> = drained.rows.iter().map(|e| e.skey.as_u64()).collect();
    assert_eq!(skeys, vec![1, 2, 3]);
}

#[test]
fn ttl_boundary_is_inclusive() {
    let reader = KkvReader::default();
    let segments = SegmentSet::new().with_built(built_segment(
        SegmentConfig::new(SegmentId::new(1)),
        |w| put(w, 1, 1, b"aa", 100),
    ));

    let alive = SearchRequest::new(PKey::new(1), 200).ttl(100);
    let rows = drain_blocking(&reader, &segments, &alive, 4).unwrap();
    assert_eq!(rows.len(), 1);

    let mut iter = reader.search_blocking(&segments, &SearchRequest::new(PKey::new(1), 200).ttl(99));
    let drained = drain_sync(&mut iter, 4).unwrap();
    assert!(drained.rows.is_empty());
    assert_eq!(drained.metrics.expired_segments_skipped, 1);
}

#[test]
fn default_ttl_applies_without_request_ttl() {
    let segments = SegmentSet::new().with_building(building(1, &[(1, b"a", 100), (2, b"b", 150)]));
    let reader = KkvReader::new(IndexConfig::new().default_ttl(Some(60)));

    let rows = drain_blocking(&reader, &segments, &SearchRequest::new(PKey::new(1), 200), 4).unwrap();
    let skeys: Vec<u64> = rows.iter().map(|e| e.skey.as_u64()).collect();
    assert_eq!(skeys, vec![2]);

    // A request TTL overrides the index default.
    let request = SearchRequest::new(PKey::new(1), 200).ttl(100);
    assert_eq!(drain_blocking(&reader, &segments, &request, 4).unwrap().len(), 2);
}

#[test]
fn stored_expire_times_decide_liveness() {
    let reader = KkvReader::new(IndexConfig::new().store_expire_time(true));
    let config = SegmentConfig::new(SegmentId::new(1)).store_expire_time(true);
    let segments = SegmentSet::new().with_built(built_segment(config, |w| {
        w.put(PKey::new(1), SKey::new(1), b"aa".to_vec(), 10, Some(200))
            .unwrap();
        w.put(PKey::new(1), SKey::new(2), b"bb".to_vec(), 10, Some(199))
            .unwrap();
        w.put(PKey::new(1), SKey::new(3), b"cc".to_vec(), 10, None)
            .unwrap();
    }));

    let rows = drain_blocking(&reader, &segments, &SearchRequest::new(PKey::new(1), 200), 4).unwrap();
    let found: Vec<(u64, Option<Timestamp>)> =
        rows.iter().map(|e| (e.skey.as_u64(), e.expire_time)).collect();
    assert_eq!(found, vec![(1, Some(200)), (3, None)]);
}

/// Two built segments for pkey 1, newest first, over an optional oldest
/// segment that only holds pkey 9.
fn last_segment_set(with_unrelated_oldest: bool) -> SegmentSet {
    let mut set = SegmentSet::new()
        .with_built(built_segment(SegmentConfig::new(SegmentId::new(3)), |w| {
            put(w, 1, 1, b"n1", 20)
        }))
        .with_built(built_segment(SegmentConfig::new(SegmentId::new(2)), |w| {
            put(w, 1, 2, b"o2", 10)
        }));
    if with_unrelated_oldest {
        set = set.with_built(built_segment(SegmentConfig::new(SegmentId::new(1)), |w| {
            put(w, 9, 3, b"x3", 5)
        }));
    }
    set
}

fn filtered_request() -> SearchRequest {
    SearchRequest::new(PKey::new(1), 100).skeys([SKey::new(1), SKey::new(2)])
}

#[test]
fn last_segment_records_found_skeys_only_when_filtered() {
    let reader = KkvReader::default();
    let segments = last_segment_set(false);

    let mut unfiltered = reader.search_blocking(&segments, &SearchRequest::new(PKey::new(1), 100));
    assert_eq!(drain_sync(&mut unfiltered, 4).unwrap().rows.len(), 2);
    assert!(unfiltered.context().found_in_built(SKey::new(1)));
    assert!(!unfiltered.context().found_in_built(SKey::new(2)));

    let mut filtered = reader.search_blocking(&segments, &filtered_request());
    assert_eq!(drain_sync(&mut filtered, 4).unwrap().rows.len(), 2);
    assert!(filtered.context().found_in_built(SKey::new(1)));
    assert!(filtered.context().found_in_built(SKey::new(2)));
}

#[tokio::test]
async fn concurrent_last_segment_records_like_blocking() {
    let reader = KkvReader::default();
    let segments = last_segment_set(false);

    let mut unfiltered =
        reader.search_concurrent(&segments, &SearchRequest::new(PKey::new(1), 100));
    let mut buf = ResultBuffer::new(4);
    unfiltered.batch_get(&mut buf).await.unwrap();
    assert_eq!(buf.len(), 2);
    assert!(unfiltered.context().found_in_built(SKey::new(1)));
    assert!(!unfiltered.context().found_in_built(SKey::new(2)));

    let mut filtered = reader.search_concurrent(&segments, &filtered_request());
    filtered.batch_get(&mut buf).await.unwrap();
    assert_eq!(buf.len(), 2);
    assert!(filtered.context().found_in_built(SKey::new(1)));
    assert!(filtered.context().found_in_built(SKey::new(2)));
}

#[tokio::test]
async fn oldest_segment_without_pkey_keeps_its_role() {
    let reader = KkvReader::default();
    let segments = last_segment_set(true);
    let request = SearchRequest::new(PKey::new(1), 100);

    // Segment 2 is not the oldest searched segment, so it records its skeys
    // in both modes even though segment 1 spawns no task.
    let mut blocking = reader.search_blocking(&segments, &request);
    assert_eq!(drain_sync(&mut blocking, 4).unwrap().rows.len(), 2);
    assert!(blocking.context().found_in_built(SKey::new(2)));

    let mut concurrent = reader.search_concurrent(&segments, &request);
    let mut buf = ResultBuffer::new(4);
    concurrent.batch_get(&mut buf).await.unwrap();
    assert_eq!(buf.len(), 2);
    assert_eq!(concurrent.metrics().tasks_spawned, 2);
    assert!(concurrent.context().found_in_built(SKey::new(1)));
    assert!(concurrent.context().found_in_built(SKey::new(2)));

    let mut filtered = reader.search_concurrent(&segments, &filtered_request());
    filtered.batch_get(&mut buf).await.unwrap();
    assert!(filtered.context().found_in_built(SKey::new(2)));
}

#[test]
fn wanted_skeys_stop_the_search_once_found() {
    let reader = KkvReader::default();
    let older = building(4, &[(7, b"x", 30)]);
    let segments = scenario(LAYOUTS[0]).with_building(older);

    let request = request(1).skeys([SKey::new(2)]);
    let mut iter = reader.search_blocking(&segments, &request);
    let drained = drain_sync(&mut iter, 8).unwrap();

    assert_eq!(drained.summary(), vec![(2, 800, false)]);
    assert_eq!(drained.metrics.built_segments_searched, 0);
}

#[test]
fn keep_sort_order_follows_insertion_order() {
    let segments =
        SegmentSet::new().with_building(building(1, &[(3, b"c", 10), (1, b"a", 11), (2, b"b", 12)]));
    let reader = KkvReader::default();
    let wanted = [SKey::new(1), SKey::new(2), SKey::new(3)];

    let jump = SearchRequest::new(PKey::new(1), 100).skeys(wanted);
    let rows = drain_blocking(&reader, &segments, &jump, 8).unwrap();
    assert_eq!(rows.iter().map(|e| e.skey.as_u64()).collect::<Vec<_>>(), vec![1, 2, 3]);

    let ordered = jump.keep_sort_order(true);
    let rows = drain_blocking(&reader, &segments, &ordered, 8).unwrap();
    assert_eq!(rows.iter().map(|e| e.skey.as_u64()).collect::<Vec<_>>(), vec![3, 1, 2]);
}

#[test]
fn newer_building_segment_shadows_older() {
    let segments = SegmentSet::new()
        .with_building(building(2, &[(1, b"new", 20)]))
        .with_building(building(1, &[(1, b"old", 10), (2, b"two", 10)]));
    let reader = KkvReader::default();

    let rows = drain_blocking(&reader, &segments, &SearchRequest::new(PKey::new(1), 100), 8).unwrap();
    let found: Vec<(u64, &[u8], bool)> = rows
        .iter()
        .map(|e| (e.skey.as_u64(), e.value.as_slice(), e.duplicate))
        .collect();
    assert_eq!(found, vec![(1, &b"new"[..], false), (2, &b"two"[..], false)]);
}

#[test]
fn realtime_and_watermark_metrics() {
    let realtime = SegmentConfig::new(SegmentId::new(2))
        .realtime(true)
        .locator(Locator::new(0, 50));
    let segments = SegmentSet::new()
        .with_built(built_segment(realtime, |w| put(w, 1, 1, b"rt", 20)))
        .with_built(built_segment(SegmentConfig::new(SegmentId::new(1)), |w| {
            put(w, 1, 2, b"ol", 10)
        }));
    let reader = KkvReader::default();

    let mut iter = reader.search_blocking(&segments, &SearchRequest::new(PKey::new(1), 100));
    let drained = drain_sync(&mut iter, 8).unwrap();
    assert_eq!(drained.rows.len(), 2);
    assert_eq!(drained.metrics.built_segments_searched, 2);
    assert_eq!(drained.metrics.realtime_segments_searched, 1);

    let request = SearchRequest::new(PKey::new(1), 100).watermark(Locator::new(0, 60));
    let mut iter = reader.search_blocking(&segments, &request);
    let drained = drain_sync(&mut iter, 8).unwrap();
    assert_eq!(drained.summary(), vec![(2, 10, false)]);
    assert_eq!(drained.metrics.obsolete_segments_skipped, 1);
}
