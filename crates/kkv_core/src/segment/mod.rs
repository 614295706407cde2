//! Segments: in-memory building segments and sealed built segments.
//!
//! A search visits building segments before built segments, newest first
//! within each realm. Built segments are immutable files described in
//! [`format`]; building segments receive writes while being searched.

mod building;
mod building_iter;
mod built;
mod built_iter;
pub mod format;
mod group;
mod reader;
mod set;
mod writer;

pub use building::BuildingSegment;
pub use building_iter::BuildingValueIterator;
pub use built::{BuiltSegment, DATA_FILE_NAME, VALUE_FILE_NAME};
pub use built_iter::BuiltValueIterator;
pub use format::{KeyTableEntry, SegmentFooter};
pub use group::{GroupEntry, PKeyGroup};
pub use reader::{DedupMode, Segment, SegmentIterator, SegmentReader, SegmentRole};
pub use set::SegmentSet;
pub use writer::BuiltSegmentWriter;

pub(crate) use built_iter::SKeyFilter;
pub(crate) use reader::plan_readers;
