//! Iterator over the values of one pkey in a building segment.

use super::group::{GroupEntry, PKeyGroup};
use super::reader::DedupMode;
use crate::buffer::ResultBuffer;
use crate::search::{Admission, Realm, SearchContext};
use crate::skey::SKeySearchContext;
use crate::types::{SKey, Timestamp};
use crate::value::ValueEntry;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Traversal {
    /// Walk the group in insertion order.
    Sequential,
    /// Walk the wanted skeys in ascending order and look each one up in the group.
    Jump,
}

/// Iterates the values of a pkey snapshot taken from a building segment.
///
/// With a wanted-skey set the iterator jumps straight to each wanted key,
/// unless the caller asked to keep segment order, in which case it walks
/// the group and filters.
#[derive(Debug)]
pub struct BuildingValueIterator {
    group: Arc<PKeyGroup>,
    skeys: Arc<SKeySearchContext>,
    traversal: Traversal,
    pos: usize,
    dedup: DedupMode,
}

impl BuildingValueIterator {
    pub(crate) fn new(
        group: Arc<PKeyGroup>,
        skeys: Arc<SKeySearchContext>,
        keep_sort_order: bool,
        dedup: DedupMode,
    ) -> Self {
        let traversal = if !skeys.is_empty() && !keep_sort_order {
            Traversal::Jump
        } else {
            Traversal::Sequential
        };
        let mut iter = Self {
            group,
            skeys,
            traversal,
            pos: 0,
            dedup,
        };
        iter.settle();
        iter
    }

    /// Moves `pos` forward to the next slot that passes the filter.
    fn settle(&mut self) {
        match self.traversal {
            Traversal::Sequential => {
                let entries = self.group.entries();
                while self.pos < entries.len() && !self.skeys.matches(entries[self.pos].skey) {
                    self.pos += 1;
                }
            }
            Traversal::Jump => {
                let wanted = self.skeys.sorted_skeys();
                while self.pos < wanted.len() && self.group.get(wanted[self.pos]).is_none() {
                    self.pos += 1;
                }
            }
        }
    }

    fn current(&self) -> Option<&GroupEntry> {
        match self.traversal {
            Traversal::Sequential => self.group.entries().get(self.pos),
            Traversal::Jump => self
                .skeys
                .sorted_skeys()
                .get(self.pos)
                .and_then(|&skey| self.group.get(skey)),
        }
    }

    /// Returns true while positioned on an entry.
    pub fn is_valid(&self) -> bool {
        self.current().is_some()
    }

    /// Moves to the next entry.
    pub fn advance(&mut self) {
        if self.is_valid() {
            self.pos += 1;
            self.settle();
        }
    }

    /// Returns the current skey.
    pub fn skey(&self) -> Option<SKey> {
        self.current().map(|entry| entry.skey)
    }

    /// Returns the current timestamp.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.current().map(|entry| entry.timestamp)
    }

    /// Returns the current expire time.
    pub fn expire_time(&self) -> Option<Timestamp> {
        self.current().and_then(|entry| entry.expire_time)
    }

    /// Returns true if the current entry is a skey tombstone.
    pub fn is_deleted(&self) -> bool {
        self.current().is_some_and(|entry| entry.deleted)
    }

    /// Returns the current value bytes.
    pub fn value(&self) -> Option<&[u8]> {
        self.current().map(|entry| entry.value.as_slice())
    }

    /// Returns true if the pkey was deleted in this segment.
    pub fn has_pkey_tombstone(&self) -> bool {
        self.group.has_tombstone()
    }

    /// Appends admitted entries until the buffer stops accepting or the
    /// group is done. Returns true once the group is exhausted.
    pub(crate) fn batch_get(&mut self, ctx: &mut SearchContext, buf: &mut ResultBuffer) -> bool {
        loop {
            let Some(entry) = self.current() else {
                return true;
            };
            if !buf.can_accept() || ctx.all_wanted_found() {
                return false;
            }
            if let Admission::Emit { duplicate } = ctx.admit(Realm::Building, entry.meta(), self.dedup)
            {
                buf.emplace_back(
                    ValueEntry {
                        skey: entry.skey,
                        timestamp: entry.timestamp,
                        expire_time: entry.expire_time,
                        deleted: entry.deleted,
                        value: entry.value.clone(),
                        duplicate,
                    },
                    None,
                );
            }
            self.pos += 1;
            self.settle();
        }
    }
}
