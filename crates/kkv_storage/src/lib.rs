//! # kkv storage
//!
//! Byte-store backends underneath kkvdb segments.
//!
//! Backends are **opaque byte stores**: a built segment keeps its chunks,
//! key table and footer in one backend and offset-placed values in another,
//! but the backend never interprets any of it.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush)
//! - No knowledge of chunk layouts, key tables or value areas
//! - Must be `Send + Sync`; segments are shared read-only across queries
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and building-segment dumps kept in RAM
//! - [`FileBackend`] - For persisted segments using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use kkv_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"chunk bytes").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"chunk bytes");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
