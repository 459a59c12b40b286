//! MMap Window Cache
//!
//! A bounded pool of read-only mapped byte ranges shared by every reader and
//! writer in the process.
//!
//! ## Responsibilities
//! - Map aligned windows of registered files on demand
//! - Keep the total number of mapped windows under a fixed cap
//! - Evict strictly least-recently-used windows across all files
//! - Drop every window of a file when the file is closed
//!
//! ## Concurrency
//! Lookup, insertion and eviction happen under one `parking_lot::Mutex`.
//! A [`MappedRange`] pins its mapping through an `Arc`, so reading through it
//! needs no lock and stays valid even after the cache evicts the window; the
//! next lookup simply maps it again.

mod cache;

pub use cache::{CacheStats, CachedFile, MappedRange, MmapCache};
