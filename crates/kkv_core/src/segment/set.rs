//! The segments a search runs over.

use super::building::BuildingSegment;
use super::built::BuiltSegment;
use std::sync::Arc;

/// Building and built segments of an index, each realm newest first.
///
/// Building segments keep the order they were added in; callers add the
/// newest first. Built segments are kept sorted by descending id.
#[derive(Debug, Clone, Default)]
pub struct SegmentSet {
    building: Vec<Arc<BuildingSegment>>,
    built: Vec<Arc<BuiltSegment>>,
}

impl SegmentSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a building segment older than those already added.
    #[must_use]
    pub fn with_building(mut self, segment: Arc<BuildingSegment>) -> Self {
        self.push_building(segment);
        self
    }

    /// Adds a built segment.
    #[must_use]
    pub fn with_built(mut self, segment: Arc<BuiltSegment>) -> Self {
        self.push_built(segment);
        self
    }

    /// Adds a building segment older than those already added.
    pub fn push_building(&mut self, segment: Arc<BuildingSegment>) {
        self.building.push(segment);
    }

    /// Adds a built segment, keeping newest-first order.
    pub fn push_built(&mut self, segment: Arc<BuiltSegment>) {
        let index = self
            .built
            .partition_point(|existing| existing.id() > segment.id());
        self.built.insert(index, segment);
    }

    /// Returns the building segments, newest first.
    pub fn building(&self) -> &[Arc<BuildingSegment>] {
        &self.building
    }

    /// Returns the built segments, newest first.
    pub fn built(&self) -> &[Arc<BuiltSegment>] {
        &self.built
    }

    /// Returns the total number of segments.
    pub fn len(&self) -> usize {
        self.building.len() + self.built.len()
    }

    /// Returns true if the set holds no segment.
    pub fn is_empty(&self) -> bool {
        self.building.is_empty() && self.built.is_empty()
    }
}
