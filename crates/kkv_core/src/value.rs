//! Value entries and the out-of-line value store.

use crate::config::ValueLength;
use crate::error::{CoreError, CoreResult};
use crate::stats::SegmentStats;
use crate::types::{SKey, Timestamp};
use kkv_storage::StorageBackend;
use std::fmt;
use std::sync::Arc;

/// One row of a search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    /// Secondary key.
    pub skey: SKey,
    /// Write timestamp in seconds.
    pub timestamp: Timestamp,
    /// Expire time in seconds, if the entry carries one.
    pub expire_time: Option<Timestamp>,
    /// Set on skey tombstones. A search never emits tombstones, so rows it
    /// returns always carry `false`.
    pub deleted: bool,
    /// Value bytes.
    pub value: Vec<u8>,
    /// Set when a newer building segment already produced this skey.
    ///
    /// Duplicates do not count against the quota and are skipped by the
    /// consumption cursor.
    pub duplicate: bool,
}

impl ValueEntry {
    /// Creates a non-duplicate entry.
    pub fn new(skey: SKey, timestamp: Timestamp, value: impl Into<Vec<u8>>) -> Self {
        Self {
            skey,
            timestamp,
            expire_time: None,
            deleted: false,
            value: value.into(),
            duplicate: false,
        }
    }

    pub(crate) fn footprint(&self) -> usize {
        self.value.len() + std::mem::size_of::<Self>()
    }
}

/// The liveness-relevant part of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryMeta {
    pub skey: SKey,
    pub timestamp: Timestamp,
    pub expire_time: Option<Timestamp>,
    pub deleted: bool,
}

/// A value that may still live in a value store.
#[derive(Debug, Clone)]
pub(crate) enum StoredValue {
    Inline(Vec<u8>),
    Offset {
        area: Arc<ValueArea>,
        offset: u64,
        len: usize,
    },
    /// Skey tombstones carry no value.
    Absent,
}

/// A value read that the result buffer performs after the scan.
///
/// `len` comes from the chunk entry, so the buffer can charge the value
/// against its byte limit before reading it.
#[derive(Debug, Clone)]
pub(crate) struct PendingValue {
    pub area: Arc<ValueArea>,
    pub offset: u64,
    pub len: usize,
}

/// An entry as decoded from a segment, before admission.
#[derive(Debug, Clone)]
pub(crate) struct RawEntry {
    pub meta: EntryMeta,
    pub value: StoredValue,
}

impl RawEntry {
    /// Turns the entry into a result row. Offset values come back unresolved.
    pub(crate) fn into_value_entry(self, duplicate: bool) -> (ValueEntry, Option<PendingValue>) {
        let (value, pending) = match self.value {
            StoredValue::Inline(bytes) => (bytes, None),
            StoredValue::Offset { area, offset, len } => {
                (Vec::new(), Some(PendingValue { area, offset, len }))
            }
            StoredValue::Absent => (Vec::new(), None),
        };
        let entry = ValueEntry {
            skey: self.meta.skey,
            timestamp: self.meta.timestamp,
            expire_time: self.meta.expire_time,
            deleted: self.meta.deleted,
            value,
            duplicate,
        };
        (entry, pending)
    }
}

/// Reader over a segment's separate value store.
///
/// Fixed-length values are stored back to back. Variable-length values are
/// prefixed with their length as a little-endian `u32`.
pub struct ValueArea {
    backend: Arc<dyn StorageBackend>,
    length: ValueLength,
    stats: Arc<SegmentStats>,
}

impl ValueArea {
    pub(crate) fn new(
        backend: Arc<dyn StorageBackend>,
        length: ValueLength,
        stats: Arc<SegmentStats>,
    ) -> Self {
        Self {
            backend,
            length,
            stats,
        }
    }

    /// Reads the value stored at `offset`.
    pub fn read(&self, offset: u64) -> CoreResult<Vec<u8>> {
        let value = match self.length {
            ValueLength::Fixed(len) => self.backend.read_at(offset, len as usize)?,
            ValueLength::Variable => {
                let header = self.backend.read_at(offset, 4)?;
                let len = u32::from_le_bytes(header.try_into().map_err(|_| {
                    CoreError::segment_corruption(format!("short value header at {offset}"))
                })?);
                let start = offset.checked_add(4).ok_or_else(|| {
                    CoreError::segment_corruption(format!("value offset {offset} out of range"))
                })?;
                self.backend.read_at(start, len as usize)?
            }
        };
        self.stats.record_value_read(value.len() as u64);
        Ok(value)
    }

    /// Reads a value whose length the chunk entry already recorded.
    ///
    /// A variable-length value is read together with its header in one
    /// backend read; a header that disagrees with `len` is corruption.
    pub fn read_exact(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        let value = match self.length {
            ValueLength::Fixed(fixed) => {
                if len != fixed as usize {
                    return Err(CoreError::segment_corruption(format!(
                        "value at {offset} recorded as {len} bytes in a {fixed} byte layout"
                    )));
                }
                self.backend.read_at(offset, len)?
            }
            ValueLength::Variable => {
                let mut bytes = self.backend.read_at(offset, 4 + len)?;
                let stored = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
                if stored != len {
                    return Err(CoreError::segment_corruption(format!(
                        "value at {offset} has length {stored}, entry says {len}"
                    )));
                }
                bytes.drain(..4);
                bytes
            }
        };
        self.stats.record_value_read(value.len() as u64);
        Ok(value)
    }

    /// Reads several `(offset, len)` values, in the order given.
    pub fn read_many(&self, slots: &[(u64, usize)]) -> CoreResult<Vec<Vec<u8>>> {
        slots
            .iter()
            .map(|&(offset, len)| self.read_exact(offset, len))
            .collect()
    }
}

impl fmt::Debug for ValueArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueArea")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kkv_storage::InMemoryBackend;

    fn area(data: Vec<u8>, length: ValueLength) -> ValueArea {
        ValueArea::new(
            Arc::new(InMemoryBackend::from_bytes(data)),
            length,
            Arc::new(SegmentStats::new()),
        )
    }

    #[test]
    fn read_fixed() {
        let area = area(b"aaaabbbb".to_vec(), ValueLength::Fixed(4));
        assert_eq!(area.read(4).unwrap(), b"bbbb");
        assert_eq!(
            area.read_many(&[(4, 4), (0, 4)]).unwrap(),
            vec![b"bbbb".to_vec(), b"aaaa".to_vec()]
        );
        assert_eq!(area.stats.value_reads(), 3);
    }

    #[test]
    fn read_variable() {
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(b"hi");
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"abc");
        let area = area(data, ValueLength::Variable);

        assert_eq!(area.read(0).unwrap(), b"hi");
        assert_eq!(area.read(6).unwrap(), b"abc");
        assert_eq!(area.read_exact(6, 3).unwrap(), b"abc");
    }

    #[test]
    fn recorded_length_must_match_store() {
        let mut data = Vec::new();
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"abcdef");
        let variable = area(data, ValueLength::Variable);
        assert!(variable.read_exact(0, 5).unwrap_err().is_corruption());

        let fixed = area(b"abcd".to_vec(), ValueLength::Fixed(4));
        assert!(fixed.read_exact(0, 2).unwrap_err().is_corruption());
    }

    #[test]
    fn read_past_end_fails() {
        let area = area(b"abc".to_vec(), ValueLength::Fixed(4));
        assert!(matches!(area.read(0), Err(CoreError::Storage(_))));
    }

    #[test]
    fn offset_entry_is_unresolved() {
        let area = Arc::new(area(b"abcd".to_vec(), ValueLength::Fixed(4)));
        let raw = RawEntry {
            meta: EntryMeta {
                skey: SKey::new(1),
                timestamp: 10,
                expire_time: None,
                deleted: false,
            },
            value: StoredValue::Offset {
                area,
                offset: 0,
                len: 4,
            },
        };
        let (entry, pending) = raw.into_value_entry(true);
        assert!(entry.value.is_empty());
        assert!(entry.duplicate);
        assert!(!entry.deleted);
        assert_eq!(pending.map(|p| (p.offset, p.len)), Some((0, 4)));
    }
}
