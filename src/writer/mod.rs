//! Writer Module
//!
//! The single writer of a stream: validates entries, applies the rotation
//! policy, appends, and recovers from corrupted active files by rotating.
//!
//! ## Write Flow
//! ```text
//! write(items) ─▶ policy.evaluate ──rotate?──▶ archive + successor (+ vacuum)
//!                      │
//!                      ▼
//!               append_entry ──corruption──▶ rotate, retry once
//!                      │              └────▶ resource/IO: return error
//!                      ▼
//!                 sync strategy
//! ```

mod journal_writer;
mod policy;

pub use journal_writer::{JournalWriter, WriteReceipt};
pub use policy::{RotationPolicy, RotationReason};
