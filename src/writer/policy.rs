//! When to stop appending to the active file.

use std::fmt;
use std::time::Duration;

use crate::config::Config;
use crate::format::{
    FileState, HEADER_SIZE, INCOMPATIBLE_COMPACT, INCOMPATIBLE_COMPRESSED_LZ4,
    INCOMPATIBLE_KEYED_HASH,
};
use crate::journal::{HashKind, JournalFile};

/// Rotate once a hash table holds this many objects per bucket
const DEFAULT_MAX_HASH_FILL: f64 = 0.75;

/// Rotate once a hash chain grows this deep
const DEFAULT_MAX_CHAIN_DEPTH: u64 = 100;

/// Why the active file is being rotated
#[derive(Debug, Clone, PartialEq)]
pub enum RotationReason {
    /// Used bytes reached the soft size limit
    SizeLimit { used: u64, limit: u64 },
    HashTableFull { kind: HashKind, fill: f64 },
    ChainTooDeep { kind: HashKind, depth: u64 },
    /// Oldest entry is older than `max_file_age`
    Stale { age: Duration },
    /// Wall clock went backwards relative to the tail entry
    TimeWentBackwards { tail_realtime: u64, realtime: u64 },
    /// Header layout or feature flags differ from the configuration
    FormatMismatch(String),
    NotOnline,
    /// An append failed in a way a fresh file can fix
    AppendFailed(String),
    /// Requested by the caller
    Manual,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationReason::SizeLimit { used, limit } => {
                write!(f, "size limit reached ({} of {} bytes)", used, limit)
            }
            RotationReason::HashTableFull { kind, fill } => {
                write!(f, "{:?} hash table {:.0}% full", kind, fill * 100.0)
            }
            RotationReason::ChainTooDeep { kind, depth } => {
                write!(f, "{:?} hash chain depth {}", kind, depth)
            }
            RotationReason::Stale { age } => write!(f, "oldest entry is {:?} old", age),
            RotationReason::TimeWentBackwards {
                tail_realtime,
                realtime,
            } => write!(f, "realtime {} before tail entry {}", realtime, tail_realtime),
            RotationReason::FormatMismatch(what) => write!(f, "format mismatch: {}", what),
            RotationReason::NotOnline => write!(f, "file is not online"),
            RotationReason::AppendFailed(error) => write!(f, "append failed: {}", error),
            RotationReason::Manual => write!(f, "requested"),
        }
    }
}

/// Limits checked before every append
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pub max_file_size: u64,
    pub max_file_age: Option<Duration>,
    pub max_hash_fill: f64,
    pub max_chain_depth: u64,
    /// Incompatible flags the configuration asks for
    pub expected_flags: u32,
}

impl RotationPolicy {
    pub fn from_config(config: &Config) -> Self {
        let mut expected_flags = 0;
        if config.compact {
            expected_flags |= INCOMPATIBLE_COMPACT;
        }
        if config.compress_threshold.is_some() {
            expected_flags |= INCOMPATIBLE_COMPRESSED_LZ4;
        }
        if config.keyed_hash {
            expected_flags |= INCOMPATIBLE_KEYED_HASH;
        }
        Self {
            max_file_size: config.max_file_size,
            max_file_age: config.max_file_age,
            max_hash_fill: DEFAULT_MAX_HASH_FILL,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            expected_flags,
        }
    }

    /// First reason to rotate `file` before appending an entry stamped
    /// `realtime`, if any. Limits that grow with content only apply once the
    /// file holds an entry, so a fresh file is never rotated for them.
    pub fn evaluate(&self, file: &JournalFile, realtime: u64) -> Option<RotationReason> {
        let h = file.header();

        if h.state != FileState::Online {
            return Some(RotationReason::NotOnline);
        }
        if h.header_size != HEADER_SIZE {
            return Some(RotationReason::FormatMismatch(format!(
                "header size {}",
                h.header_size
            )));
        }
        if h.incompatible_flags != self.expected_flags {
            return Some(RotationReason::FormatMismatch(format!(
                "incompatible flags {:#x}, configured {:#x}",
                h.incompatible_flags, self.expected_flags
            )));
        }
        if h.n_entries == 0 {
            return None;
        }

        let used = file.used_size();
        if used >= self.max_file_size {
            return Some(RotationReason::SizeLimit {
                used,
                limit: self.max_file_size,
            });
        }
        for kind in [HashKind::Data, HashKind::Field] {
            let fill = file.hash_table_fill(kind);
            if fill > self.max_hash_fill {
                return Some(RotationReason::HashTableFull { kind, fill });
            }
            let depth = file.hash_chain_depth(kind);
            if depth >= self.max_chain_depth {
                return Some(RotationReason::ChainTooDeep { kind, depth });
            }
        }
        if realtime < h.tail_entry_realtime {
            return Some(RotationReason::TimeWentBackwards {
                tail_realtime: h.tail_entry_realtime,
                realtime,
            });
        }
        if let Some(max_age) = self.max_file_age {
            let age = Duration::from_micros(realtime.saturating_sub(h.head_entry_realtime));
            if age > max_age {
                return Some(RotationReason::Stale { age });
            }
        }
        None
    }
}
