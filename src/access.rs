//! Read access seam.
//!
//! Access policy lives outside the engine. The reader asks an
//! [`AccessControl`] before opening each file and records a denial instead of
//! failing the query.

use std::fmt;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Decides whether the current caller may read a file
pub trait AccessControl: Send + Sync {
    fn may_read(&self, path: &Path) -> bool;
}

/// Grants everything; the OS still enforces file permissions on open
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn may_read(&self, _path: &Path) -> bool {
        true
    }
}

/// Only files owned by one of the listed uids
#[derive(Debug, Clone, Default)]
pub struct OwnerAllowList {
    uids: Vec<u32>,
}

impl OwnerAllowList {
    pub fn new(uids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            uids: uids.into_iter().collect(),
        }
    }
}

impl AccessControl for OwnerAllowList {
    fn may_read(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|meta| self.uids.contains(&meta.uid()))
            .unwrap_or(false)
    }
}

/// Closures work as policies too
impl<F> AccessControl for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn may_read(&self, path: &Path) -> bool {
        self(path)
    }
}

impl fmt::Debug for dyn AccessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessControl")
    }
}
