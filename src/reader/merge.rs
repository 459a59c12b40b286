//! Time-ordered merge over many files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::access::{AccessControl, AllowAll};
use crate::config::{Config, TieBreak};
use crate::error::AtlasError;
use crate::mmap::MmapCache;
use crate::rotation::JournalName;

use super::cursor::{FileCursor, JournalEntry};
use super::report::QueryReport;

/// How a reader opens and orders its files
#[derive(Clone)]
pub struct ReaderOptions {
    pub tie_break: TieBreak,
    pub access: Arc<dyn AccessControl>,
    pub cache: MmapCache,
}

impl ReaderOptions {
    pub fn new(cache: MmapCache) -> Self {
        Self {
            tie_break: TieBreak::default(),
            access: Arc::new(AllowAll),
            cache,
        }
    }

    pub fn from_config(config: &Config, cache: MmapCache) -> Self {
        Self::new(cache).tie_break(config.tie_break)
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    pub fn access(mut self, access: impl AccessControl + 'static) -> Self {
        self.access = Arc::new(access);
        self
    }
}

/// Merges entries of many files in `(realtime, seqnum, file priority)` order.
///
/// A file that turns out to be corrupt, unsupported or unreadable is dropped
/// from the merge and recorded in the [`QueryReport`]; the remaining files
/// keep producing entries. Iteration itself never fails.
pub struct JournalReader {
    cursors: Vec<FileCursor>,
    report: QueryReport,
}

impl JournalReader {
    /// Open every journal file in `dir` (active, archived and disposed)
    pub fn open_directory(dir: &Path, options: &ReaderOptions) -> Self {
        let mut report = QueryReport::default();
        let mut paths = Vec::new();
        match fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if JournalName::from_path(&path).is_some() && path.is_file() {
                        paths.push(path);
                    }
                }
            }
            Err(e) => {
                let error = AtlasError::from(e).with_path(dir);
                warn!(dir = %dir.display(), error = %error, "cannot list journal directory");
                report.record(dir, &error);
            }
        }
        paths.sort();

        let mut reader = Self::open_files(&paths, options);
        for (path, failure) in report.skipped {
            reader.report.skipped.insert(path, failure);
        }
        reader.report.permission_denied.extend(report.permission_denied);
        reader
    }

    /// Open the given files
    pub fn open_files(paths: &[PathBuf], options: &ReaderOptions) -> Self {
        let mut report = QueryReport::default();
        let mut cursors = Vec::with_capacity(paths.len());

        for path in paths {
            if !options.access.may_read(path) {
                debug!(path = %path.display(), "read access denied");
                report.record(path, &AtlasError::PermissionDenied(path.clone()));
                continue;
            }
            match FileCursor::open(path, &options.cache) {
                Ok(cursor) => cursors.push(cursor),
                Err(e) => {
                    let e = e.with_path(path);
                    warn!(path = %path.display(), error = %e, "skipping journal file");
                    report.record(path, &e);
                }
            }
        }

        // Fixed priority per file: rank by age, then flip for newest-first.
        let mut order: Vec<(u64, u64, PathBuf, usize)> = cursors
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let (created, generation, path) = c.age_key();
                (created, generation, path, i)
            })
            .collect();
        order.sort();
        let last = order.len().saturating_sub(1) as u64;
        for (rank, (_, _, _, i)) in order.into_iter().enumerate() {
            cursors[i].priority = match options.tie_break {
                TieBreak::OldestFirst => rank as u64,
                TieBreak::NewestFirst => last - rank as u64,
            };
        }

        Self { cursors, report }
    }

    /// Files still taking part in the merge
    pub fn files(&self) -> Vec<&Path> {
        self.cursors.iter().map(|c| c.path()).collect()
    }

    pub fn report(&self) -> &QueryReport {
        &self.report
    }

    pub fn into_report(self) -> QueryReport {
        self.report
    }

    /// Restart every file from its first entry
    pub fn seek_head(&mut self) {
        for cursor in &mut self.cursors {
            cursor.seek_head();
        }
    }

    /// Position every file at its first entry with realtime ≥ `realtime`
    pub fn seek_realtime(&mut self, realtime: u64) {
        self.retain_ok(|cursor| cursor.seek_realtime(realtime));
    }

    /// Position every file at its first entry with seqnum ≥ `seqnum`
    pub fn seek_seqnum(&mut self, seqnum: u64) {
        self.retain_ok(|cursor| cursor.seek_seqnum(seqnum));
    }

    /// Drop every cursor for which `op` fails, recording the failure
    fn retain_ok(&mut self, mut op: impl FnMut(&mut FileCursor) -> crate::Result<()>) {
        let report = &mut self.report;
        self.cursors.retain_mut(|cursor| match op(cursor) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %cursor.path().display(), error = %e, "dropping journal file from query");
                report.record(cursor.path(), &e);
                false
            }
        });
    }

    /// Index of the cursor holding the smallest pending entry
    fn pick(&mut self) -> Option<usize> {
        let mut best: Option<(u64, u64, u64, usize)> = None;
        let mut i = 0;
        while i < self.cursors.len() {
            let cursor = &mut self.cursors[i];
            let priority = cursor.priority;
            let peeked = cursor
                .peek()
                .map(|entry| entry.map(|entry| (entry.realtime, entry.seqnum)));
            match peeked {
                Ok(Some((realtime, seqnum))) => {
                    let key = (realtime, seqnum, priority, i);
                    if best.map_or(true, |b| key < b) {
                        best = Some(key);
                    }
                    i += 1;
                }
                Ok(None) => i += 1,
                Err(e) => {
                    let cursor = self.cursors.remove(i);
                    warn!(path = %cursor.path().display(), error = %e, "dropping journal file from query");
                    self.report.record(cursor.path(), &e);
                    // Indices after i shifted; restart so `best` stays valid.
                    best = None;
                    i = 0;
                }
            }
        }
        best.map(|(_, _, _, i)| i)
    }
}

impl Iterator for JournalReader {
    type Item = JournalEntry;

    fn next(&mut self) -> Option<JournalEntry> {
        let i = self.pick()?;
        self.cursors[i].advance()
    }
}
