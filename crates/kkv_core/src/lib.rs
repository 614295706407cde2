//! # kkv Core
//!
//! Multi-value lookup engine for kkv.
//!
//! A pkey maps to a group of skey/value pairs spread over several segment
//! generations: in-memory building segments that still receive writes and
//! sealed built segments on disk. A search merges them newest first and
//! yields the current values of the pkey:
//!
//! - pkey and skey tombstones hide older data
//! - entries past their TTL or expire time are dropped
//! - an optional wanted-skey set restricts the result
//! - a quota caps the number of rows
//! - results arrive in bounded, resumable batches
//!
//! Built segments can be read on the caller's thread or by parallel tokio
//! tasks; both produce the same ordered output.
//!
//! ## Example
//!
//! ```rust
//! use kkv_core::{
//!     BuildingSegment, KkvReader, PKey, ResultBuffer, SearchRequest, SegmentId, SegmentSet, SKey,
//! };
//! use std::sync::Arc;
//!
//! let building = Arc::new(BuildingSegment::new(SegmentId::new(1)));
//! building.put(PKey::new(7), SKey::new(1), b"hello".to_vec(), 100, None);
//!
//! let segments = SegmentSet::new().with_building(building);
//! let reader = KkvReader::default();
//! let mut iter = reader.search_blocking(&segments, &SearchRequest::new(PKey::new(7), 200));
//!
//! let mut buf = ResultBuffer::new(16);
//! iter.batch_get(&mut buf).unwrap();
//! assert_eq!(buf.entries()[0].value, b"hello");
//! assert!(!iter.is_valid());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod buffer;
mod config;
mod error;
pub mod search;
pub mod segment;
mod skey;
mod stats;
mod types;
mod value;

pub use buffer::{BufferState, ResultBuffer};
pub use config::{IndexConfig, SearchMode, SegmentConfig, ValueLayout, ValueLength, ValuePlacement};
pub use error::{CoreError, CoreResult};
pub use search::{
    ConcurrentIterator, KkvIterator, KkvReader, Realm, SearchContext, SearchRequest, SyncIterator,
};
pub use segment::{
    BuildingSegment, BuiltSegment, BuiltSegmentWriter, KeyTableEntry, SegmentFooter, SegmentSet,
};
pub use skey::SKeySearchContext;
pub use stats::{SearchMetrics, SegmentStats, SegmentStatsSnapshot};
pub use types::{Locator, PKey, SKey, SegmentId, Timestamp};
pub use value::{ValueArea, ValueEntry};
