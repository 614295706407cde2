//! Wanted secondary-key set of a search.

use crate::types::SKey;
use std::collections::HashSet;

/// The set of secondary keys a search asks for.
///
/// An empty set means every skey is wanted. The keys are kept twice: as a
/// hash set for membership tests and as a sorted, deduplicated list for
/// jump traversal and pruning.
#[derive(Debug, Clone, Default)]
pub struct SKeySearchContext {
    sorted: Vec<SKey>,
    members: HashSet<SKey>,
}

impl SKeySearchContext {
    /// Builds the wanted set. Duplicates are collapsed.
    pub fn new(skeys: impl IntoIterator<Item = SKey>) -> Self {
        let members: HashSet<SKey> = skeys.into_iter().collect();
        let mut sorted: Vec<SKey> = members.iter().copied().collect();
        sorted.sort_unstable();
        Self { sorted, members }
    }

    /// Returns true if no filter is set.
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Returns the number of distinct wanted keys.
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// Returns true if `skey` is in the wanted set.
    ///
    /// Always false for an empty set; callers check `is_empty` first.
    pub fn contains(&self, skey: SKey) -> bool {
        self.members.contains(&skey)
    }

    /// Returns true if `skey` passes the filter; every key passes an empty set.
    pub fn matches(&self, skey: SKey) -> bool {
        self.is_empty() || self.contains(skey)
    }

    /// Returns the largest wanted key.
    pub fn max_skey(&self) -> Option<SKey> {
        self.sorted.last().copied()
    }

    /// Returns the wanted keys in ascending order.
    pub fn sorted_skeys(&self) -> &[SKey] {
        &self.sorted
    }

    /// Returns true once `found` distinct keys cover the whole set.
    ///
    /// An empty set is never satisfied.
    pub fn all_found(&self, found: usize) -> bool {
        !self.is_empty() && found >= self.sorted.len()
    }
}
