//! # AtlasLog
//!
//! A local structured-log storage engine with:
//! - Append-only, memory-mapped binary journal files
//! - Content-addressed deduplication of field names and `FIELD=value` payloads
//! - Entry array index with skip pointers for sequential and seek access
//! - Rotation and disk-budget vacuum
//! - Corruption-tolerant, time-ordered merge reader
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              JournalWriter (one per stream)                  │
//! │        policy ─▶ append ─▶ rotate / retry ─▶ vacuum         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      JournalFile                             │
//! │   hash index (FIELD, DATA) │ entry arrays │ seals │ verify   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │   format    │          │  MmapCache  │◀──── JournalReader
//!   │ (encoding)  │          │ (LRU, Arc)  │      (merge, report)
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod types;

pub mod format;
pub mod hash;
pub mod mmap;
pub mod strbuf;
pub mod journal;
pub mod writer;
pub mod rotation;
pub mod access;
pub mod reader;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtlasError, ErrorCategory, Result};
pub use config::{Config, SyncStrategy, TieBreak};
pub use types::{Id128, Timestamps};
pub use mmap::MmapCache;
pub use journal::{JournalFile, JournalFileOptions};
pub use writer::{JournalWriter, WriteReceipt};
pub use reader::{JournalEntry, JournalReader, QueryReport, ReaderOptions};
pub use rotation::{Vacuum, VacuumLimits, VacuumReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasLog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
