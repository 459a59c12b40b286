//! File names of a stream's journal files.
//!
//! ```text
//! system.journal                                          active
//! system@<stream_id>-<generation>-<head_realtime>.journal archived
//! system@<created>-<file_id>.journal~                     disposed (dirty)
//! ```
//! Ids are 32 lowercase hex digits, numbers 16. Fixed-width hex keeps the
//! lexical order of a stream's archived names equal to generation order.

use std::path::{Path, PathBuf};

use crate::error::{AtlasError, Result};
use crate::types::Id128;

pub const JOURNAL_SUFFIX: &str = ".journal";
pub const DISPOSED_SUFFIX: &str = ".journal~";

/// A parsed journal file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalName {
    Active {
        stream: String,
    },
    Archived {
        stream: String,
        stream_id: Id128,
        generation: u64,
        head_realtime: u64,
    },
    Disposed {
        stream: String,
        created_realtime: u64,
        file_id: Id128,
    },
}

impl JournalName {
    pub fn stream(&self) -> &str {
        match self {
            JournalName::Active { stream }
            | JournalName::Archived { stream, .. }
            | JournalName::Disposed { stream, .. } => stream,
        }
    }

    /// Archived or disposed: no writer will ever touch it again
    pub fn is_retired(&self) -> bool {
        !matches!(self, JournalName::Active { .. })
    }

    /// Parse a file name (not a path); None for anything else in the directory
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(stem) = name.strip_suffix(DISPOSED_SUFFIX) {
            let (stream, rest) = split_stream(stem)?;
            let (created, file_id) = rest.split_once('-')?;
            return Some(JournalName::Disposed {
                stream,
                created_realtime: parse_hex_u64(created)?,
                file_id: parse_id(file_id)?,
            });
        }

        let stem = name.strip_suffix(JOURNAL_SUFFIX)?;
        if !stem.contains('@') {
            return valid_stream(stem).then(|| JournalName::Active {
                stream: stem.to_string(),
            });
        }
        let (stream, rest) = split_stream(stem)?;
        let mut parts = rest.splitn(3, '-');
        let stream_id = parse_id(parts.next()?)?;
        let generation = parse_hex_u64(parts.next()?)?;
        let head_realtime = parse_hex_u64(parts.next()?)?;
        Some(JournalName::Archived {
            stream,
            stream_id,
            generation,
            head_realtime,
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::parse(path.file_name()?.to_str()?)
    }

    pub fn file_name(&self) -> String {
        match self {
            JournalName::Active { stream } => format!("{}{}", stream, JOURNAL_SUFFIX),
            JournalName::Archived {
                stream,
                stream_id,
                generation,
                head_realtime,
            } => format!(
                "{}@{}-{:016x}-{:016x}{}",
                stream, stream_id, generation, head_realtime, JOURNAL_SUFFIX
            ),
            JournalName::Disposed {
                stream,
                created_realtime,
                file_id,
            } => format!(
                "{}@{:016x}-{}{}",
                stream, created_realtime, file_id, DISPOSED_SUFFIX
            ),
        }
    }
}

/// Stream names become file name stems
pub fn validate_stream(stream: &str) -> Result<()> {
    if valid_stream(stream) {
        Ok(())
    } else {
        Err(AtlasError::Config(format!("invalid stream name {:?}", stream)))
    }
}

fn valid_stream(stream: &str) -> bool {
    !stream.is_empty()
        && stream != "."
        && stream != ".."
        && !stream.contains(['@', '/', '\0'])
}

pub fn active_path(dir: &Path, stream: &str) -> PathBuf {
    dir.join(
        JournalName::Active {
            stream: stream.to_string(),
        }
        .file_name(),
    )
}

pub fn archived_path(
    dir: &Path,
    stream: &str,
    stream_id: Id128,
    generation: u64,
    head_realtime: u64,
) -> PathBuf {
    dir.join(
        JournalName::Archived {
            stream: stream.to_string(),
            stream_id,
            generation,
            head_realtime,
        }
        .file_name(),
    )
}

pub fn disposed_path(dir: &Path, stream: &str, created_realtime: u64, file_id: Id128) -> PathBuf {
    dir.join(
        JournalName::Disposed {
            stream: stream.to_string(),
            created_realtime,
            file_id,
        }
        .file_name(),
    )
}

fn split_stream(stem: &str) -> Option<(String, &str)> {
    let (stream, rest) = stem.split_once('@')?;
    valid_stream(stream).then(|| (stream.to_string(), rest))
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    if s.len() != 16 {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

fn parse_id(s: &str) -> Option<Id128> {
    if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    s.parse().ok()
}
