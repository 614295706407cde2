//! # kkv testkit
//!
//! Test utilities for kkvdb.
//!
//! This crate provides:
//! - Segment fixtures and the reference three-generation scenario
//! - Drain helpers for both search modes
//! - Storage backends that add latency or fail on demand
//! - Property-based generators and a reference merge model
//! - A harness that runs a request in both search modes, and the
//!   end-to-end suites that use it
//!
//! ## Usage
//!
//! ```rust
//! use kkv_core::{KkvReader, PKey, SearchRequest, ValueLayout};
//! use kkv_testkit::prelude::*;
//!
//! let segments = scenario(ValueLayout::inline_variable());
//! let request = SearchRequest::new(PKey::new(1), SCENARIO_NOW).ttl(SCENARIO_TTL);
//! let rows = drain_blocking(&KkvReader::default(), &segments, &request, 16).unwrap();
//! assert_eq!(rows.iter().filter(|e| !e.duplicate).count(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backends;
pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backends::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use backends::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
