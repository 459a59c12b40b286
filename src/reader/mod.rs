//! Reader Module
//!
//! Merged, time-ordered reads over many journal files with per-file fault
//! isolation.
//!
//! ## Merge
//! ```text
//!  file A cursor ──┐
//!  file B cursor ──┼──▶ pick min (realtime, seqnum, priority) ──▶ entry
//!  file C cursor ──┘           │
//!                              └── error on a cursor: drop file, record in report
//! ```

mod cursor;
mod merge;
mod report;

pub use cursor::JournalEntry;
pub use merge::{JournalReader, ReaderOptions};
pub use report::{FailureRecord, FileFailure, QueryReport};
