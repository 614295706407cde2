//! In-memory segment that still receives writes.

use super::group::PKeyGroup;
use crate::types::{PKey, SKey, SegmentId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A mutable segment held in memory.
///
/// Groups are shared with readers through `Arc`. A write to a group that a
/// reader still holds clones the group first, so a lookup keeps a stable
/// snapshot for as long as it runs.
#[derive(Debug)]
pub struct BuildingSegment {
    id: SegmentId,
    groups: RwLock<HashMap<PKey, Arc<PKeyGroup>>>,
    max_timestamp: AtomicU64,
}

impl BuildingSegment {
    /// Creates an empty building segment.
    pub fn new(id: SegmentId) -> Self {
        Self {
            id,
            groups: RwLock::new(HashMap::new()),
            max_timestamp: AtomicU64::new(0),
        }
    }

    /// Returns the segment id.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Writes a value.
    pub fn put(
        &self,
        pkey: PKey,
        skey: SKey,
        value: impl Into<Vec<u8>>,
        timestamp: Timestamp,
        expire_time: Option<Timestamp>,
    ) {
        let value = value.into();
        self.mutate(pkey, timestamp, |group| {
            group.put(skey, value, timestamp, expire_time);
        });
    }

    /// Deletes one skey of a pkey.
    pub fn delete_skey(&self, pkey: PKey, skey: SKey, timestamp: Timestamp) {
        self.mutate(pkey, timestamp, |group| group.delete_skey(skey, timestamp));
    }

    /// Deletes a whole pkey.
    pub fn delete_pkey(&self, pkey: PKey, timestamp: Timestamp) {
        self.mutate(pkey, timestamp, |group| group.delete_pkey(timestamp));
    }

    fn mutate(&self, pkey: PKey, timestamp: Timestamp, f: impl FnOnce(&mut PKeyGroup)) {
        let mut groups = self.groups.write();
        let group = groups.entry(pkey).or_default();
        f(Arc::make_mut(group));
        self.max_timestamp.fetch_max(timestamp, Ordering::Relaxed);
    }

    /// Returns a snapshot of the group of `pkey`.
    pub fn lookup(&self, pkey: PKey) -> Option<Arc<PKeyGroup>> {
        self.groups.read().get(&pkey).cloned()
    }

    /// Returns the number of pkeys.
    pub fn pkey_count(&self) -> usize {
        self.groups.read().len()
    }

    /// Returns true if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Returns the newest timestamp written.
    pub fn max_timestamp(&self) -> Timestamp {
        self.max_timestamp.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of every group, ordered by pkey.
    pub fn snapshot(&self) -> Vec<(PKey, Arc<PKeyGroup>)> {
        let mut groups: Vec<(PKey, Arc<PKeyGroup>)> = self
            .groups
            .read()
            .iter()
            .map(|(pkey, group)| (*pkey, Arc::clone(group)))
            .collect();
        groups.sort_unstable_by_key(|(pkey, _)| *pkey);
        groups
    }
}
