//! Searching a pkey across segments.
//!
//! [`KkvReader::search`] builds a resumable iterator for one pkey. The
//! iterator is drained with repeated `batch_get` calls into a
//! [`ResultBuffer`] until it reports itself invalid.
//!
//! ```rust,ignore
//! let reader = KkvReader::new(IndexConfig::default());
//! let mut iter = reader.search(&segments, SearchRequest::new(pkey, now).ttl(3600))?;
//! let mut buf = ResultBuffer::new(64);
//! while iter.is_valid() {
//!     iter.batch_get(&mut buf).await?;
//!     for entry in buf.iter() {
//!         println!("{} => {:?}", entry.skey, entry.value);
//!     }
//! }
//! ```

mod blocking;
mod concurrent;
mod context;

pub use blocking::SyncIterator;
pub use concurrent::ConcurrentIterator;
pub(crate) use context::Admission;
pub use context::{Realm, SearchContext};

use crate::buffer::ResultBuffer;
use crate::config::{IndexConfig, SearchMode};
use crate::error::{CoreError, CoreResult};
use crate::segment::SegmentSet;
use crate::stats::SearchMetrics;
use crate::types::{Locator, PKey, SKey, Timestamp};
use tracing::debug;

/// Parameters of one search call.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// The pkey to search.
    pub pkey: PKey,
    /// Wanted skeys; empty means all.
    pub skeys: Vec<SKey>,
    /// Time-to-live override in seconds.
    pub ttl: Option<u64>,
    /// Current time in seconds.
    pub now: Timestamp,
    /// Maximum number of non-duplicate rows.
    pub quota: usize,
    /// Keep segment order instead of jumping between wanted skeys.
    pub keep_sort_order: bool,
    /// Progress of a fresher data source.
    pub watermark: Option<Locator>,
    /// Overrides the index's search mode.
    pub mode: Option<SearchMode>,
}

impl SearchRequest {
    /// Creates a request for every skey of `pkey` with no quota.
    #[must_use]
    pub fn new(pkey: PKey, now: Timestamp) -> Self {
        Self {
            pkey,
            skeys: Vec::new(),
            ttl: None,
            now,
            quota: usize::MAX,
            keep_sort_order: false,
            watermark: None,
            mode: None,
        }
    }

    /// Restricts the search to these skeys.
    #[must_use]
    pub fn skeys(mut self, skeys: impl IntoIterator<Item = SKey>) -> Self {
        self.skeys = skeys.into_iter().collect();
        self
    }

    /// Sets the time-to-live.
    #[must_use]
    pub const fn ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the row quota.
    #[must_use]
    pub const fn quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    /// Sets whether segment order is kept.
    #[must_use]
    pub const fn keep_sort_order(mut self, value: bool) -> Self {
        self.keep_sort_order = value;
        self
    }

    /// Sets the progress watermark.
    #[must_use]
    pub const fn watermark(mut self, watermark: Locator) -> Self {
        self.watermark = Some(watermark);
        self
    }

    /// Sets the search mode.
    #[must_use]
    pub const fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Iterator returned by [`KkvReader::search`].
#[derive(Debug)]
pub enum KkvIterator {
    /// Segments visited on the caller's thread.
    Blocking(SyncIterator),
    /// Built segments read by spawned tasks.
    Concurrent(ConcurrentIterator),
}

impl KkvIterator {
    /// Returns the mode driving this iterator.
    pub fn mode(&self) -> SearchMode {
        match self {
            Self::Blocking(_) => SearchMode::Blocking,
            Self::Concurrent(_) => SearchMode::Concurrent,
        }
    }

    /// Returns true while more rows may follow.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Blocking(iter) => iter.is_valid(),
            Self::Concurrent(iter) => iter.is_valid(),
        }
    }

    /// Returns true if a pkey tombstone ended the search.
    pub fn has_pkey_tombstone(&self) -> bool {
        match self {
            Self::Blocking(iter) => iter.has_pkey_tombstone(),
            Self::Concurrent(iter) => iter.has_pkey_tombstone(),
        }
    }

    /// Returns the counters of this search.
    pub fn metrics(&self) -> &SearchMetrics {
        match self {
            Self::Blocking(iter) => iter.metrics(),
            Self::Concurrent(iter) => iter.metrics(),
        }
    }

    /// Fills `buf` with the next batch.
    ///
    /// A blocking iterator does its I/O on the calling thread before the
    /// returned future first yields.
    pub async fn batch_get(&mut self, buf: &mut ResultBuffer) -> CoreResult<()> {
        match self {
            Self::Blocking(iter) => iter.batch_get(buf),
            Self::Concurrent(iter) => iter.batch_get(buf).await,
        }
    }
}

/// Entry point for searches over a set of segments.
#[derive(Debug, Clone, Default)]
pub struct KkvReader {
    config: IndexConfig,
}

impl KkvReader {
    /// Creates a reader with the given index configuration.
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    /// Returns the index configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Builds an iterator for one search.
    ///
    /// The request's mode wins over the index's. A quota of zero yields an
    /// iterator that is invalid from the start.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a concurrent search is requested
    /// outside a tokio runtime.
    pub fn search(&self, segments: &SegmentSet, request: SearchRequest) -> CoreResult<KkvIterator> {
        let mode = request.mode.unwrap_or(self.config.search_mode);
        debug!(
            pkey = %request.pkey,
            skeys = request.skeys.len(),
            ?mode,
            segments = segments.len(),
            "search"
        );
        match mode {
            SearchMode::Blocking => Ok(KkvIterator::Blocking(self.search_blocking(segments, &request))),
            SearchMode::Concurrent => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(CoreError::invalid_operation(
                        "concurrent search requires a tokio runtime",
                    ));
                }
                Ok(KkvIterator::Concurrent(self.search_concurrent(segments, &request)))
            }
        }
    }

    /// Builds an iterator that visits segments on the caller's thread.
    pub fn search_blocking(&self, segments: &SegmentSet, request: &SearchRequest) -> SyncIterator {
        SyncIterator::new(segments, SearchContext::new(request, &self.config), request.quota)
    }

    /// Builds an iterator that fans built-segment reads out to tasks.
    ///
    /// The iterator must be driven inside a tokio runtime.
    pub fn search_concurrent(
        &self,
        segments: &SegmentSet,
        request: &SearchRequest,
    ) -> ConcurrentIterator {
        ConcurrentIterator::new(segments, SearchContext::new(request, &self.config), request.quota)
    }
}
