//! Rotation & Vacuum Module
//!
//! Naming of a stream's files and removal of retired files under a disk
//! budget. The rotation itself (archive, rename, create successor) is driven
//! by the writer.
//!
//! ## File Lifecycle
//! ```text
//!            create                  rotate
//!   (none) ─────────▶ system.journal ───────▶ system@<id>-<gen>-<time>.journal
//!                        │                              │
//!                        │ dirty / corrupt on open      │ vacuum
//!                        ▼                              ▼
//!          system@<time>-<id>.journal~ ──────────▶  (deleted)
//! ```

pub mod naming;
pub mod vacuum;

pub use naming::{
    active_path, archived_path, disposed_path, validate_stream, JournalName, DISPOSED_SUFFIX,
    JOURNAL_SUFFIX,
};
pub use vacuum::{Vacuum, VacuumLimits, VacuumReport};
