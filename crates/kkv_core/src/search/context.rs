//! Per-search state shared by every segment a search visits.

use crate::config::IndexConfig;
use crate::search::SearchRequest;
use crate::segment::{BuiltSegment, DedupMode};
use crate::skey::SKeySearchContext;
use crate::stats::SearchMetrics;
use crate::types::{Locator, PKey, SKey, Timestamp};
use crate::value::EntryMeta;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Which side of the index an entry comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realm {
    /// In-memory segments still receiving writes.
    Building,
    /// Immutable on-disk segments.
    Built,
}

/// Outcome of offering an entry to the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Append the entry to the result.
    Emit {
        /// A newer building segment already produced this skey.
        duplicate: bool,
    },
    /// The entry is shadowed, deleted or no longer alive.
    Drop,
}

/// State of one search across all segments.
///
/// Building and built segments keep separate found sets. A skey first seen
/// in a building segment hides older building entries; a built entry whose
/// skey was already seen in a building segment is still emitted, flagged
/// as a duplicate, so the consumer can tell the two apart.
#[derive(Debug)]
pub struct SearchContext {
    pkey: PKey,
    skeys: Arc<SKeySearchContext>,
    now: Timestamp,
    min_timestamp: Timestamp,
    ttl: Option<u64>,
    keep_sort_order: bool,
    watermark: Option<Locator>,
    building_found: HashSet<SKey>,
    built_found: HashSet<SKey>,
    resolved: usize,
    pkey_tombstone: bool,
    metrics: SearchMetrics,
}

impl SearchContext {
    pub(crate) fn new(request: &SearchRequest, config: &IndexConfig) -> Self {
        let ttl = request.ttl.or(config.default_ttl);
        let min_timestamp = if config.store_expire_time {
            0
        } else {
            ttl.map_or(0, |ttl| request.now.saturating_sub(ttl))
        };
        Self {
            pkey: request.pkey,
            skeys: Arc::new(SKeySearchContext::new(request.skeys.iter().copied())),
            now: request.now,
            min_timestamp,
            ttl,
            keep_sort_order: request.keep_sort_order,
            watermark: request.watermark,
            building_found: HashSet::new(),
            built_found: HashSet::new(),
            resolved: 0,
            pkey_tombstone: false,
            metrics: SearchMetrics::default(),
        }
    }

    /// Returns the searched pkey.
    pub fn pkey(&self) -> PKey {
        self.pkey
    }

    /// Returns the wanted skey set.
    pub fn skeys(&self) -> &Arc<SKeySearchContext> {
        &self.skeys
    }

    /// Returns true if the search names wanted skeys.
    pub fn is_filtered(&self) -> bool {
        !self.skeys.is_empty()
    }

    /// Returns the current time of the search.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Returns the oldest timestamp an entry may carry and still be returned.
    pub fn min_timestamp(&self) -> Timestamp {
        self.min_timestamp
    }

    /// Returns whether segment order must be preserved over skey order.
    pub fn keep_sort_order(&self) -> bool {
        self.keep_sort_order
    }

    /// Returns true once a pkey tombstone ended the search.
    pub fn has_pkey_tombstone(&self) -> bool {
        self.pkey_tombstone
    }

    /// Returns the counters of this search.
    pub fn metrics(&self) -> &SearchMetrics {
        &self.metrics
    }

    /// Returns true if a building segment produced `skey`.
    pub fn found_in_building(&self, skey: SKey) -> bool {
        self.building_found.contains(&skey)
    }

    /// Returns true if a built segment produced `skey`.
    pub fn found_in_built(&self, skey: SKey) -> bool {
        self.built_found.contains(&skey)
    }

    pub(crate) fn metrics_mut(&mut self) -> &mut SearchMetrics {
        &mut self.metrics
    }

    pub(crate) fn mark_pkey_tombstone(&mut self) {
        self.pkey_tombstone = true;
    }

    /// Returns true once every wanted skey was decided.
    pub(crate) fn all_wanted_found(&self) -> bool {
        self.skeys.all_found(self.resolved)
    }

    /// Returns true if the entry is within the TTL bound and not expired.
    ///
    /// An entry without an expire time expires at `timestamp + ttl`.
    pub(crate) fn is_alive(&self, meta: &EntryMeta) -> bool {
        if meta.timestamp < self.min_timestamp {
            return false;
        }
        let expire = meta
            .expire_time
            .or_else(|| self.ttl.map(|ttl| meta.timestamp.saturating_add(ttl)));
        !matches!(expire, Some(expire) if expire < self.now)
    }

    /// Decides whether an entry joins the result.
    ///
    /// Deleted and dead entries still mark their skey as found so that
    /// older segments cannot resurrect it.
    pub(crate) fn admit(&mut self, realm: Realm, meta: EntryMeta, dedup: DedupMode) -> Admission {
        let first_seen = match (realm, dedup) {
            (_, DedupMode::Skip) => true,
            (Realm::Building, DedupMode::LookupOnly) => !self.building_found.contains(&meta.skey),
            (Realm::Building, DedupMode::Insert) => self.building_found.insert(meta.skey),
            (Realm::Built, DedupMode::LookupOnly) => !self.built_found.contains(&meta.skey),
            (Realm::Built, DedupMode::Insert) => self.built_found.insert(meta.skey),
        };
        if !first_seen {
            return Admission::Drop;
        }

        let duplicate = realm == Realm::Built && self.building_found.contains(&meta.skey);
        if !duplicate && dedup == DedupMode::Insert {
            self.resolved += 1;
        }
        if meta.deleted || !self.is_alive(&meta) {
            return Admission::Drop;
        }
        if duplicate {
            self.metrics.duplicates_emitted += 1;
        }
        Admission::Emit { duplicate }
    }

    /// Returns false for built segments that cannot contribute.
    pub(crate) fn should_search(&mut self, segment: &BuiltSegment) -> bool {
        if segment.max_timestamp() < self.min_timestamp {
            debug!(
                segment = %segment.id(),
                max_ts = segment.max_timestamp(),
                min_ts = self.min_timestamp,
                "skipping segment older than ttl bound"
            );
            self.metrics.expired_segments_skipped += 1;
            return false;
        }
        if segment.is_obsolete(self.watermark.as_ref()) {
            debug!(segment = %segment.id(), "skipping segment covered by watermark");
            self.metrics.obsolete_segments_skipped += 1;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(skey: u64, timestamp: Timestamp) -> EntryMeta {
        EntryMeta {
            skey: SKey::new(skey),
            timestamp,
            expire_time: None,
            deleted: false,
        }
    }

    fn context(request: SearchRequest, config: IndexConfig) -> SearchContext {
        SearchContext::new(&request, &config)
    }

    #[test]
    fn ttl_bound_is_inclusive() {
        let ctx = context(
            SearchRequest::new(PKey::new(1), 1000).ttl(100),
            IndexConfig::default(),
        );
        assert_eq!(ctx.min_timestamp(), 900);
        assert!(ctx.is_alive(&meta(1, 900)));
        assert!(!ctx.is_alive(&meta(1, 899)));
        assert!(ctx.is_alive(&meta(1, 1000)));
    }

    #[test]
    fn request_ttl_overrides_default() {
        let ctx = context(
            SearchRequest::new(PKey::new(1), 1000).ttl(10),
            IndexConfig::new().default_ttl(Some(500)),
        );
        assert_eq!(ctx.min_timestamp(), 990);

        let ctx = context(
            SearchRequest::new(PKey::new(1), 1000),
            IndexConfig::new().default_ttl(Some(500)),
        );
        assert_eq!(ctx.min_timestamp(), 500);
    }

    #[test]
    fn stored_expire_time_disables_bound() {
        let ctx = context(
            SearchRequest::new(PKey::new(1), 1000).ttl(100),
            IndexConfig::new().store_expire_time(true),
        );
        assert_eq!(ctx.min_timestamp(), 0);

        let mut entry = meta(1, 10);
        entry.expire_time = Some(1000);
        assert!(ctx.is_alive(&entry));
        entry.expire_time = Some(999);
        assert!(!ctx.is_alive(&entry));

        // No expire time: ttl applies from the entry timestamp.
        assert!(!ctx.is_alive(&meta(1, 10)));
        assert!(ctx.is_alive(&meta(1, 950)));
    }

    #[test]
    fn no_ttl_keeps_everything() {
        let ctx = context(SearchRequest::new(PKey::new(1), 1000), IndexConfig::default());
        assert_eq!(ctx.min_timestamp(), 0);
        assert!(ctx.is_alive(&meta(1, 0)));
    }

    #[test]
    fn building_entries_shadow_older_building_entries() {
        let mut ctx = context(SearchRequest::new(PKey::new(1), 1000), IndexConfig::default());
        assert_eq!(
            ctx.admit(Realm::Building, meta(1, 10), DedupMode::Insert),
            Admission::Emit { duplicate: false }
        );
        assert_eq!(
            ctx.admit(Realm::Building, meta(1, 5), DedupMode::LookupOnly),
            Admission::Drop
        );
    }

    #[test]
    fn built_entry_seen_in_building_is_duplicate() {
        let mut ctx = context(SearchRequest::new(PKey::new(1), 1000), IndexConfig::default());
        ctx.admit(Realm::Building, meta(2, 900), DedupMode::Insert);

        assert_eq!(
            ctx.admit(Realm::Built, meta(2, 500), DedupMode::Insert),
            Admission::Emit { duplicate: true }
        );
        // A second built occurrence is shadowed by the first.
        assert_eq!(
            ctx.admit(Realm::Built, meta(2, 100), DedupMode::LookupOnly),
            Admission::Drop
        );
        assert_eq!(ctx.metrics().duplicates_emitted, 1);
    }

    #[test]
    fn tombstones_mark_found_but_are_not_emitted() {
        let mut ctx = context(SearchRequest::new(PKey::new(1), 1000), IndexConfig::default());
        let mut tombstone = meta(3, 900);
        tombstone.deleted = true;

        assert_eq!(ctx.admit(Realm::Built, tombstone, DedupMode::Insert), Admission::Drop);
        assert!(ctx.found_in_built(SKey::new(3)));
        assert_eq!(ctx.admit(Realm::Built, meta(3, 100), DedupMode::Insert), Admission::Drop);
    }

    #[test]
    fn expired_entry_still_shadows() {
        let mut ctx = context(
            SearchRequest::new(PKey::new(1), 1000).ttl(100),
            IndexConfig::default(),
        );
        assert_eq!(ctx.admit(Realm::Building, meta(1, 10), DedupMode::Insert), Admission::Drop);
        assert!(ctx.found_in_building(SKey::new(1)));
    }

    #[test]
    fn filtered_search_counts_resolved_keys() {
        let mut ctx = context(
            SearchRequest::new(PKey::new(1), 1000).skeys([SKey::new(1), SKey::new(2)]),
            IndexConfig::default(),
        );
        ctx.admit(Realm::Building, meta(1, 10), DedupMode::Insert);
        assert!(!ctx.all_wanted_found());

        // A duplicate does not resolve a new key.
        ctx.admit(Realm::Built, meta(1, 5), DedupMode::Insert);
        assert!(!ctx.all_wanted_found());

        ctx.admit(Realm::Built, meta(2, 5), DedupMode::Insert);
        assert!(ctx.all_wanted_found());
    }

    #[test]
    fn skip_mode_leaves_found_set_untouched() {
        let mut ctx = context(SearchRequest::new(PKey::new(1), 1000), IndexConfig::default());
        assert_eq!(
            ctx.admit(Realm::Built, meta(1, 10), DedupMode::Skip),
            Admission::Emit { duplicate: false }
        );
        assert!(!ctx.found_in_built(SKey::new(1)));
    }
}
