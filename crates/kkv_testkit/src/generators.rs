//! Property-based test generators using proptest.
//!
//! A [`History`] is a list of generations of writes to a single pkey,
//! oldest first. It can be materialized as any mix of building and built
//! segments, and [`History::expected`] computes what a search must return
//! by replaying the generations newest first.

use kkv_core::segment::PKeyGroup;
use kkv_core::{
    BuildingSegment, BuiltSegmentWriter, PKey, SKey, SegmentConfig, SegmentId, SegmentSet,
    Timestamp, ValueLayout,
};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// The pkey every generated history writes to.
pub const HISTORY_PKEY: PKey = PKey::new(42);

/// Timestamps of generation `g` fall in `[g * GENERATION_SPAN, (g + 1) * GENERATION_SPAN)`.
pub const GENERATION_SPAN: Timestamp = 1_000;

/// Length of generated values, so histories fit every layout in [`crate::LAYOUTS`].
pub const GENERATED_VALUE_LEN: usize = crate::FIXED_VALUE_LEN as usize;

/// One write to the history pkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Write a value.
    Put {
        /// Secondary key.
        skey: u64,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Delete one skey.
    DeleteSkey {
        /// Secondary key.
        skey: u64,
    },
    /// Delete the whole pkey.
    DeletePkey,
}

/// Strategy for skeys drawn from a small space, so generations collide.
pub fn skey_strategy() -> impl Strategy<Value = u64> {
    0u64..12
}

/// Strategy for a single write.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (skey_strategy(), prop::collection::vec(any::<u8>(), GENERATED_VALUE_LEN))
            .prop_map(|(skey, value)| Op::Put { skey, value }),
        2 => skey_strategy().prop_map(|skey| Op::DeleteSkey { skey }),
        1 => Just(Op::DeletePkey),
    ]
}

/// Strategy for a set of wanted skeys; empty means unfiltered.
pub fn wanted_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop_oneof![
        1 => Just(Vec::new()),
        2 => prop::collection::vec(skey_strategy(), 1..5),
    ]
}

/// Writes of a pkey split into generations, oldest first.
#[derive(Debug, Clone)]
pub struct History {
    /// Each generation's writes, in write order.
    pub generations: Vec<Vec<Op>>,
}

/// Strategy for a history of `1..=max_generations` generations.
pub fn history_strategy(max_generations: usize) -> impl Strategy<Value = History> {
    prop::collection::vec(prop::collection::vec(op_strategy(), 0..10), 1..=max_generations)
        .prop_map(|generations| History { generations })
}

impl History {
    /// Returns the timestamp of write `index` in generation `generation`.
    pub fn timestamp(generation: usize, index: usize) -> Timestamp {
        generation as Timestamp * GENERATION_SPAN + index as Timestamp + 1
    }

    /// Replays one generation into a fresh group.
    pub fn group(&self, generation: usize) -> PKeyGroup {
        let mut group = PKeyGroup::new();
        for (index, op) in self.generations[generation].iter().enumerate() {
            let ts = Self::timestamp(generation, index);
            match op {
                Op::Put { skey, value } => group.put(SKey::new(*skey), value.clone(), ts, None),
                Op::DeleteSkey { skey } => group.delete_skey(SKey::new(*skey), ts),
                Op::DeletePkey => group.delete_pkey(ts),
            }
        }
        group
    }

    /// Materializes the history.
    ///
    /// The newest `building` generations become building segments, the
    /// rest become built segments in `layout`. Segment ids follow the
    /// generation index.
    ///
    /// # Panics
    ///
    /// Panics if a built segment cannot be sealed.
    pub fn segments(&self, building: usize, layout: ValueLayout) -> SegmentSet {
        let total = self.generations.len();
        let building = building.min(total);
        let mut set = SegmentSet::new();

        for generation in (0..total).rev() {
            let id = SegmentId::new(generation as u64 + 1);
            if generation >= total - building {
                let segment = BuildingSegment::new(id);
                self.replay(generation, |op, ts| match op {
                    Op::Put { skey, value } => {
                        segment.put(HISTORY_PKEY, SKey::new(*skey), value.clone(), ts, None)
                    }
                    Op::DeleteSkey { skey } => segment.delete_skey(HISTORY_PKEY, SKey::new(*skey), ts),
                    Op::DeletePkey => segment.delete_pkey(HISTORY_PKEY, ts),
                });
                set.push_building(Arc::new(segment));
            } else {
                let mut writer = BuiltSegmentWriter::new(SegmentConfig::new(id).layout(layout));
                self.replay(generation, |op, ts| match op {
                    Op::Put { skey, value } => writer
                        .put(HISTORY_PKEY, SKey::new(*skey), value.clone(), ts, None)
                        .expect("Failed to write value"),
                    Op::DeleteSkey { skey } => writer.delete_skey(HISTORY_PKEY, SKey::new(*skey), ts),
                    Op::DeletePkey => writer.delete_pkey(HISTORY_PKEY, ts),
                });
                set.push_built(Arc::new(writer.finish_in_memory().expect("Failed to seal segment")));
            }
        }
        set
    }

    fn replay(&self, generation: usize, mut apply: impl FnMut(&Op, Timestamp)) {
        for (index, op) in self.generations[generation].iter().enumerate() {
            apply(op, Self::timestamp(generation, index));
        }
    }

    /// Returns the `(skey, timestamp, value)` rows a search without TTL
    /// must return as non-duplicates, sorted by skey.
    ///
    /// The newest version of each skey wins; deleted skeys yield nothing
    /// and a pkey deletion hides every older generation.
    pub fn expected(&self, wanted: &[u64]) -> BTreeSet<(u64, Timestamp, Vec<u8>)> {
        let wanted: HashSet<u64> = wanted.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut rows = BTreeSet::new();

        for generation in (0..self.generations.len()).rev() {
            let group = self.group(generation);
            for entry in group.entries() {
                let skey = entry.skey.as_u64();
                if !wanted.is_empty() && !wanted.contains(&skey) {
                    continue;
                }
                if seen.insert(skey) && !entry.deleted {
                    rows.insert((skey, entry.timestamp, entry.value.clone()));
                }
            }
            if group.has_tombstone() {
                break;
            }
        }
        rows
    }

    /// Returns true if some generation deletes the pkey.
    pub fn has_pkey_delete(&self) -> bool {
        self.generations
            .iter()
            .any(|ops| ops.iter().any(|op| *op == Op::DeletePkey))
    }
}
