//! Property tests: searches agree with a replay of the write history.

use kkv_core::{KkvReader, SKey, SearchRequest, Timestamp, ValueEntry};
use crate::prelude::*;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};

const NOW: Timestamp = 1_000_000;

fn request(wanted: &[u64]) -> SearchRequest {
    SearchRequest::new(HISTORY_PKEY, NOW).skeys(wanted.iter().copied().map(SKey::new))
}

fn visible(rows: &[ValueEntry]) -> BTreeSet<(u64, Timestamp, Vec<u8>)> {
    rows.iter()
        .filter(|entry| !entry.duplicate)
        .map(|entry| (entry.skey.as_u64(), entry.timestamp, entry.value.clone()))
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn search_matches_replay(
        history in history_strategy(5),
        building in 0usize..3,
        layout in 0usize..4,
        wanted in wanted_strategy(),
    ) {
        let segments = history.segments(building, LAYOUTS[layout]);
        let rows = drain_blocking(&KkvReader::default(), &segments, &request(&wanted), 64).unwrap();

        let mut skeys = HashSet::new();
        for entry in rows.iter().filter(|entry| !entry.duplicate) {
            prop_assert!(skeys.insert(entry.skey), "skey {} returned twice", entry.skey);
        }
        prop_assert_eq!(visible(&rows), history.expected(&wanted));
    }

    #[test]
    fn pages_concatenate_to_one_batch(
        history in history_strategy(4),
        building in 0usize..3,
        rows_per_page in 1usize..4,
    ) {
        let segments = history.segments(building, LAYOUTS[0]);
        let reader = KkvReader::default();
        let request = request(&[]);

        let whole = drain_blocking(&reader, &segments, &request, 1024).unwrap();
        let paged = drain_blocking(&reader, &segments, &request, rows_per_page).unwrap();
        prop_assert_eq!(paged, whole);
    }

    #[test]
    fn quota_truncates_visible_rows(
        history in history_strategy(4),
        building in 0usize..3,
        quota in 1usize..6,
    ) {
        let segments = history.segments(building, LAYOUTS[2]);
        let reader = KkvReader::default();

        let all = drain_blocking(&reader, &segments, &request(&[]), 64).unwrap();
        let limited = drain_blocking(&reader, &segments, &request(&[]).quota(quota), 2).unwrap();

        let all: Vec<&ValueEntry> = all.iter().filter(|entry| !entry.duplicate).collect();
        let limited: Vec<&ValueEntry> = limited.iter().filter(|entry| !entry.duplicate).collect();
        prop_assert_eq!(limited.len(), quota.min(all.len()));
        prop_assert_eq!(&limited[..], &all[..limited.len()]);
    }

    #[test]
    fn concurrent_equals_blocking(
        history in history_strategy(5),
        building in 0usize..3,
        layout in 0usize..4,
        wanted in wanted_strategy(),
    ) {
        let segments = history.segments(building, LAYOUTS[layout]);
        let reader = KkvReader::default();
        let request = request(&wanted);

        let blocking = drain_blocking(&reader, &segments, &request, 3).unwrap();
        let concurrent = runtime()
            .block_on(drain_concurrent(&reader, &segments, &request, 3))
            .unwrap();
        prop_assert_eq!(concurrent, blocking);
    }
}
