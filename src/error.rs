//! Error types for AtlasLog
//!
//! Provides a unified error type for all operations, plus the classification
//! the write path and the reader use to decide between rotating, skipping a
//! file, or propagating.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

// errno values that mean "the machine is out of something"
const ENOMEM: i32 = 12;
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;
const ENOSPC: i32 = 28;
const EDQUOT: i32 = 122;

/// Unified error type for AtlasLog operations
#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    /// No space, too many open files, or out of memory
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The active file reached its hard size limit
    #[error("Journal file full: {0}")]
    FileFull(String),

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt object at offset {offset}: {reason}")]
    CorruptObject { offset: u64, reason: String },

    #[error("Corrupt journal file: {0}")]
    CorruptFile(String),

    /// The file declares a capability this implementation does not know
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    // -------------------------------------------------------------------------
    // Filesystem Errors
    // -------------------------------------------------------------------------
    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(io::Error),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error categories, used for per-file error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    Resource,
    Corrupt,
    Unsupported,
    PermissionDenied,
    NotFound,
    Io,
    Invalid,
}

impl AtlasError {
    /// Shorthand for building a `CorruptObject` error
    pub fn corrupt_object(offset: u64, reason: impl Into<String>) -> Self {
        AtlasError::CorruptObject {
            offset,
            reason: reason.into(),
        }
    }

    /// Attach a path to path-less `NotFound` / `PermissionDenied` errors
    /// produced by `From<io::Error>`.
    pub fn with_path(self, path: &Path) -> Self {
        match self {
            AtlasError::NotFound(p) if p.as_os_str().is_empty() => {
                AtlasError::NotFound(path.to_path_buf())
            }
            AtlasError::PermissionDenied(p) if p.as_os_str().is_empty() => {
                AtlasError::PermissionDenied(path.to_path_buf())
            }
            other => other,
        }
    }

    /// Format violation found while reading
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            AtlasError::CorruptObject { .. } | AtlasError::CorruptFile(_)
        )
    }

    /// Out of disk, descriptors or memory
    pub fn is_resource(&self) -> bool {
        matches!(self, AtlasError::ResourceExhausted(_))
    }

    /// Whether a failed append should be retried once in a fresh file.
    ///
    /// Resource and IO failures are excluded: a new file would not help.
    pub fn rotates_on_append(&self) -> bool {
        self.is_corruption()
            || matches!(
                self,
                AtlasError::FileFull(_) | AtlasError::UnsupportedFeature(_)
            )
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AtlasError::ResourceExhausted(_) | AtlasError::FileFull(_) => ErrorCategory::Resource,
            AtlasError::CorruptObject { .. } | AtlasError::CorruptFile(_) => ErrorCategory::Corrupt,
            AtlasError::UnsupportedFeature(_) => ErrorCategory::Unsupported,
            AtlasError::PermissionDenied(_) => ErrorCategory::PermissionDenied,
            AtlasError::NotFound(_) => ErrorCategory::NotFound,
            AtlasError::Io(_) => ErrorCategory::Io,
            AtlasError::InvalidItem(_) | AtlasError::Config(_) => ErrorCategory::Invalid,
        }
    }
}

impl From<io::Error> for AtlasError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => return AtlasError::NotFound(PathBuf::new()),
            io::ErrorKind::PermissionDenied => {
                return AtlasError::PermissionDenied(PathBuf::new())
            }
            io::ErrorKind::OutOfMemory => return AtlasError::ResourceExhausted(err.to_string()),
            _ => {}
        }
        match err.raw_os_error() {
            Some(ENOSPC | EDQUOT | EMFILE | ENFILE | ENOMEM) => {
                AtlasError::ResourceExhausted(err.to_string())
            }
            _ => AtlasError::Io(err),
        }
    }
}
