//! Shared data generators for the kkvdb benchmarks.

use kkv_core::{
    BuildingSegment, BuiltSegment, BuiltSegmentWriter, PKey, SKey, SegmentConfig, SegmentId,
    SegmentSet, ValueLayout,
};
use rand::Rng;
use std::sync::Arc;

/// The pkey every generated segment writes to.
pub const BENCH_PKEY: PKey = PKey::new(7);

/// Generate random value bytes of the specified size.
pub fn random_value(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Seals one built segment holding `skeys` random skeys of [`BENCH_PKEY`]
/// plus `noise` other pkeys with a single value each.
///
/// # Panics
///
/// Panics if `value_len` does not match a fixed layout.
pub fn built_segment(
    id: u64,
    layout: ValueLayout,
    skeys: u64,
    noise: u64,
    value_len: usize,
) -> Arc<BuiltSegment> {
    let mut rng = rand::thread_rng();
    let mut writer = BuiltSegmentWriter::new(SegmentConfig::new(SegmentId::new(id)).layout(layout));
    let ts = id * 1_000;
    for _ in 0..skeys {
        let skey = SKey::new(rng.gen_range(0..skeys * 4));
        writer
            .put(BENCH_PKEY, skey, random_value(value_len), ts, None)
            .expect("Failed to write value");
    }
    for pkey in 0..noise {
        writer
            .put(
                PKey::new(1_000 + pkey),
                SKey::new(pkey),
                random_value(value_len),
                ts,
                None,
            )
            .expect("Failed to write value");
    }
    Arc::new(writer.finish_in_memory().expect("Failed to seal segment"))
}

/// Builds a set of `built` built segments plus one building segment, all
/// holding values of [`BENCH_PKEY`].
///
/// # Panics
///
/// Panics if `value_len` does not match a fixed layout.
pub fn segment_set(built: u64, layout: ValueLayout, skeys: u64, value_len: usize) -> SegmentSet {
    let mut set = SegmentSet::new();

    let building = Arc::new(BuildingSegment::new(SegmentId::new(built + 1)));
    let mut rng = rand::thread_rng();
    for _ in 0..skeys / 4 {
        building.put(
            BENCH_PKEY,
            SKey::new(rng.gen_range(0..skeys * 4)),
            random_value(value_len),
            (built + 1) * 1_000,
            None,
        );
    }
    set.push_building(building);

    for id in 1..=built {
        set.push_built(built_segment(id, layout, skeys, 64, value_len));
    }
    set
}
