//! Built segments persisted to and reopened from disk.

use kkv_core::segment::format::{compute_crc32, KEY_ENTRY_SIZE};
use kkv_core::segment::DATA_FILE_NAME;
use kkv_core::{
    BuildingSegment, BuiltSegment, BuiltSegmentWriter, CoreError, KkvReader, PKey, ResultBuffer,
    SKey, SearchRequest, SegmentConfig, SegmentId, SegmentSet, ValueLayout,
};
use crate::prelude::*;
use std::fs;
use std::sync::Arc;

#[test]
fn persisted_segment_answers_like_in_memory_one() {
    for layout in LAYOUTS {
        let config = SegmentConfig::new(SegmentId::new(5)).layout(layout).chunk_size(16);
        let write = |w: &mut BuiltSegmentWriter| {
            for pkey in 1..=20u64 {
                for skey in 0..pkey % 5 {
                    put(w, pkey, skey, &[pkey as u8, skey as u8], pkey * 10 + skey);
                }
            }
            w.delete_skey(PKey::new(3), SKey::new(1), 31);
        };

        let disk = DiskSegment::create(config.clone(), write);
        let memory = built_segment(config, write);
        assert_eq!(disk.segment.key_count(), memory.key_count());
        assert!(disk.segment.verify().unwrap() > 1);

        let reader = KkvReader::default();
        for pkey in 1..=21u64 {
            let request = SearchRequest::new(PKey::new(pkey), 1_000);
            let from_disk = drain_blocking(
                &reader,
                &SegmentSet::new().with_built(Arc::clone(&disk.segment)),
                &request,
                3,
            )
            .unwrap();
            let from_memory =
                drain_blocking(&reader, &SegmentSet::new().with_built(Arc::clone(&memory)), &request, 3)
                    .unwrap();
            assert_eq!(from_disk, from_memory, "{layout:?} pkey {pkey}");
        }
    }
}

#[test]
fn dumped_building_segment_keeps_its_answers() {
    let building = Arc::new(BuildingSegment::new(SegmentId::new(1)));
    building.put(PKey::new(1), SKey::new(2), b"bb".to_vec(), 20, None);
    building.put(PKey::new(1), SKey::new(1), b"aa".to_vec(), 10, None);
    building.delete_skey(PKey::new(1), SKey::new(3), 30);
    building.delete_pkey(PKey::new(2), 40);

    let config = SegmentConfig::new(SegmentId::new(1)).layout(ValueLayout::offset_variable());
    let disk = DiskSegment::create(config, |w| w.extend_from_building(&building).unwrap());

    let reader = KkvReader::default();
    for pkey in [1, 2] {
        let request = SearchRequest::new(PKey::new(pkey), 100);
        let live = drain_blocking(
            &reader,
            &SegmentSet::new().with_building(Arc::clone(&building)),
            &request,
            8,
        )
        .unwrap();
        let mut iter = reader.search_blocking(
            &SegmentSet::new().with_built(Arc::clone(&disk.segment)),
            &request,
        );
        let dumped = drain_sync(&mut iter, 8).unwrap();

        let mut live_skeys: Vec<u64> = live.iter().map(|e| e.skey.as_u64()).collect();
        let dumped_skeys: Vec<u64> = dumped.rows.iter().map(|e| e.skey.as_u64()).collect();
        live_skeys.sort_unstable();
        assert_eq!(dumped_skeys, live_skeys, "pkey {pkey}");
        assert_eq!(dumped.pkey_tombstone, pkey == 2);
    }
}

#[test]
fn truncated_segment_is_rejected() {
    let disk = DiskSegment::create(SegmentConfig::new(SegmentId::new(1)), |w| {
        put(w, 1, 1, b"aa", 10);
    });
    let path = disk.path.join(DATA_FILE_NAME);
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

    let err = BuiltSegment::open_dir(&disk.path).unwrap_err();
    assert!(err.is_corruption(), "{err}");
}

#[test]
fn flipped_chunk_byte_fails_verification() {
    let disk = DiskSegment::create(SegmentConfig::new(SegmentId::new(1)), |w| {
        put(w, 1, 1, b"aa", 10);
    });
    let path = disk.path.join(DATA_FILE_NAME);
    let mut bytes = fs::read(&path).unwrap();
    // First payload byte, right after the chunk length.
    bytes[4] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let segment = BuiltSegment::open_dir(&disk.path).unwrap();
    let err = segment.verify().unwrap_err();
    assert!(matches!(err, CoreError::ChecksumMismatch { .. }), "{err}");
}

#[tokio::test]
async fn key_table_chunk_offset_past_u64_range_fails_the_search() {
    let disk = DiskSegment::create(SegmentConfig::new(SegmentId::new(1)), |w| {
        put(w, 1, 1, b"aa", 10);
        put(w, 2, 1, b"bb", 10);
    });
    let footer = disk.segment.footer().clone();
    let path = disk.path.join(DATA_FILE_NAME);
    let mut bytes = fs::read(&path).unwrap();

    // Row 0 is pkey 1; its chunk offset follows the 8-byte pkey. The table
    // checksum is rewritten so the segment still opens.
    let table = footer.key_table_offset as usize;
    let body_len = footer.key_count as usize * KEY_ENTRY_SIZE;
    bytes[table + 8..table + 16].copy_from_slice(&(u64::MAX - 1).to_le_bytes());
    let crc = compute_crc32(&bytes[table..table + body_len]);
    bytes[table + body_len..table + body_len + 4].copy_from_slice(&crc.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let segments = SegmentSet::new().with_built(Arc::new(BuiltSegment::open_dir(&disk.path).unwrap()));
    let reader = KkvReader::default();
    let request = SearchRequest::new(PKey::new(1), 100);

    let mut iter = reader.search_blocking(&segments, &request);
    let mut buf = ResultBuffer::new(4);
    let err = iter.batch_get(&mut buf).unwrap_err();
    assert!(err.is_corruption(), "{err}");
    assert!(buf.is_empty());
    assert!(!iter.is_valid());

    let mut iter = reader.search_concurrent(&segments, &request);
    let err = iter.batch_get(&mut buf).await.unwrap_err();
    assert!(err.is_corruption(), "{err}");
    assert!(!iter.is_valid());

    // Other pkeys still answer.
    let rows = drain_blocking(&reader, &segments, &SearchRequest::new(PKey::new(2), 100), 4).unwrap();
    assert_eq!(rows.len(), 1);
}
