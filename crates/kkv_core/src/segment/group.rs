//! Mutable group of values under one pkey.

use crate::types::{SKey, Timestamp};
use crate::value::EntryMeta;
use std::collections::HashMap;

/// One skey slot of a pkey group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    /// Secondary key.
    pub skey: SKey,
    /// Write timestamp.
    pub timestamp: Timestamp,
    /// Expire time, if any.
    pub expire_time: Option<Timestamp>,
    /// Whether this slot is a skey tombstone.
    pub deleted: bool,
    /// Value bytes; empty for tombstones.
    pub value: Vec<u8>,
}

impl GroupEntry {
    pub(crate) fn meta(&self) -> EntryMeta {
        EntryMeta {
            skey: self.skey,
            timestamp: self.timestamp,
            expire_time: self.expire_time,
            deleted: self.deleted,
        }
    }
}

/// Values and tombstones of one pkey, in first-insertion order.
///
/// A later write to an existing skey replaces the slot in place. A pkey
/// deletion drops every slot written before it; slots written afterwards
/// are kept and shadow nothing older than the deletion.
#[derive(Debug, Clone, Default)]
pub struct PKeyGroup {
    tombstone: Option<Timestamp>,
    entries: Vec<GroupEntry>,
    index: HashMap<SKey, usize>,
}

impl PKeyGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a value.
    pub fn put(
        &mut self,
        skey: SKey,
        value: Vec<u8>,
        timestamp: Timestamp,
        expire_time: Option<Timestamp>,
    ) {
        self.upsert(GroupEntry {
            skey,
            timestamp,
            expire_time,
            deleted: false,
            value,
        });
    }

    /// Writes a skey tombstone.
    pub fn delete_skey(&mut self, skey: SKey, timestamp: Timestamp) {
        self.upsert(GroupEntry {
            skey,
            timestamp,
            expire_time: None,
            deleted: true,
            value: Vec::new(),
        });
    }

    /// Writes a pkey tombstone, dropping every slot written so far.
    pub fn delete_pkey(&mut self, timestamp: Timestamp) {
        self.entries.clear();
        self.index.clear();
        self.tombstone = Some(self.tombstone.map_or(timestamp, |ts| ts.max(timestamp)));
    }

    fn upsert(&mut self, entry: GroupEntry) {
        match self.index.get(&entry.skey) {
            Some(&slot) => self.entries[slot] = entry,
            None => {
                self.index.insert(entry.skey, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Returns the pkey tombstone timestamp, if the pkey was deleted.
    pub fn tombstone(&self) -> Option<Timestamp> {
        self.tombstone
    }

    /// Returns true if the pkey was deleted in this group.
    pub fn has_tombstone(&self) -> bool {
        self.tombstone.is_some()
    }

    /// Returns the slots in first-insertion order.
    pub fn entries(&self) -> &[GroupEntry] {
        &self.entries
    }

    /// Returns the slots in ascending skey order.
    pub fn sorted_entries(&self) -> Vec<&GroupEntry> {
        let mut sorted: Vec<&GroupEntry> = self.entries.iter().collect();
        sorted.sort_unstable_by_key(|entry| entry.skey);
        sorted
    }

    /// Returns the slot of `skey`.
    pub fn get(&self, skey: SKey) -> Option<&GroupEntry> {
        self.index.get(&skey).map(|&slot| &self.entries[slot])
    }

    /// Returns the number of slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the group has neither slots nor a tombstone.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.tombstone.is_none()
    }

    /// Returns the newest timestamp in the group, tombstone included.
    pub fn max_timestamp(&self) -> Option<Timestamp> {
        self.entries
            .iter()
            .map(|entry| entry.timestamp)
            .chain(self.tombstone)
            .max()
    }
}
