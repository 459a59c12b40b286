//! Disk budget enforcement over retired (archived or disposed) files.
//!
//! Candidates are ordered oldest first and deleted while the directory is
//! over budget, over the file count, or the candidate is past retention. The
//! newest candidate always survives, and files currently open anywhere in the
//! process are never touched.
//!
//! Archived files of one stream id are ordered by generation. Across stream
//! ids (and for disposed files) the first-entry time decides; an archived
//! file's time is raised to its predecessor's when the clock went backwards
//! between them, so a successor never sorts before the file it replaced.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AtlasError, Result};
use crate::types::{realtime_now, Id128};

use super::naming::JournalName;

/// Limits applied by [`Vacuum::run`]; `None` disables a limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumLimits {
    /// Max bytes used by retired files
    pub max_use: Option<u64>,
    /// Max number of retired files
    pub max_files: Option<usize>,
    /// Max age of a file's first entry
    pub max_retention: Option<Duration>,
}

impl VacuumLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_use: config.max_use,
            max_files: config.max_files,
            max_retention: config.max_retention,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_use.is_none() && self.max_files.is_none() && self.max_retention.is_none()
    }
}

/// Outcome of one vacuum pass
#[derive(Debug, Clone, Default)]
pub struct VacuumReport {
    pub removed: Vec<PathBuf>,
    pub freed_bytes: u64,
    /// Bytes still used by retired files
    pub remaining_bytes: u64,
    /// Files that could not be deleted, with the reason
    pub failures: Vec<(PathBuf, String)>,
}

#[derive(Debug)]
struct Candidate {
    path: PathBuf,
    size: u64,
    /// Stream name and id of an archived file; None when disposed
    lineage: Option<(String, Id128)>,
    generation: u64,
    realtime: u64,
}

/// One vacuum pass over a directory
#[derive(Debug, Clone)]
pub struct Vacuum {
    limits: VacuumLimits,
    exclude: Vec<PathBuf>,
    stream: Option<String>,
    now: Option<u64>,
}

impl Vacuum {
    pub fn new(limits: VacuumLimits) -> Self {
        Self {
            limits,
            exclude: Vec::new(),
            stream: None,
            now: None,
        }
    }

    /// Never delete these paths (files open for reading or writing)
    pub fn exclude(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.exclude
            .extend(paths.into_iter().map(|p| fs::canonicalize(&p).unwrap_or(p)));
        self
    }

    /// Only consider files of this stream
    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Override the clock used for retention (microseconds since the epoch)
    pub fn now(mut self, realtime: u64) -> Self {
        self.now = Some(realtime);
        self
    }

    pub fn run(&self, dir: &Path) -> Result<VacuumReport> {
        let mut candidates = self.candidates(dir)?;
        order_oldest_first(&mut candidates);

        let now = self.now.unwrap_or_else(realtime_now);
        let retention = self
            .limits
            .max_retention
            .map(|age| age.as_micros().min(u64::MAX as u128) as u64);

        let mut report = VacuumReport::default();
        let mut total: u64 = candidates.iter().map(|c| c.size).sum();
        let mut count = candidates.len();
        let keep = candidates.len().saturating_sub(1);

        for candidate in candidates.iter().take(keep) {
            let over_use = self.limits.max_use.is_some_and(|max| total > max);
            let over_count = self.limits.max_files.is_some_and(|max| count > max);
            let expired =
                retention.is_some_and(|max| now.saturating_sub(candidate.realtime) > max);
            if !(over_use || over_count || expired) {
                break;
            }

            let canonical = fs::canonicalize(&candidate.path).unwrap_or_else(|_| candidate.path.clone());
            if self.exclude.contains(&canonical) {
                debug!(path = %candidate.path.display(), "vacuum skipping open file");
                continue;
            }

            match fs::remove_file(&candidate.path) {
                Ok(()) => {
                    info!(path = %candidate.path.display(), bytes = candidate.size, "vacuumed journal file");
                    report.removed.push(candidate.path.clone());
                    report.freed_bytes += candidate.size;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %candidate.path.display(), "journal file already gone");
                }
                Err(e) => {
                    warn!(path = %candidate.path.display(), error = %e, "failed to vacuum journal file");
                    report.failures.push((candidate.path.clone(), e.to_string()));
                    continue;
                }
            }
            total -= candidate.size;
            count -= 1;
        }

        report.remaining_bytes = total;
        Ok(report)
    }

    fn candidates(&self, dir: &Path) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(candidates),
            Err(e) => return Err(AtlasError::from(e).with_path(dir)),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = JournalName::from_path(&path) else {
                continue;
            };
            if !name.is_retired() {
                continue;
            }
            if self.stream.as_deref().is_some_and(|s| s != name.stream()) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            let (lineage, generation, realtime) = match name {
                JournalName::Archived {
                    stream,
                    stream_id,
                    generation,
                    head_realtime,
                } => (Some((stream, stream_id)), generation, head_realtime),
                JournalName::Disposed {
                    created_realtime, ..
                } => (None, 0, created_realtime),
                JournalName::Active { .. } => continue,
            };
            candidates.push(Candidate {
                path,
                size: metadata.len(),
                lineage,
                generation,
                realtime,
            });
        }
        Ok(candidates)
    }
}

fn order_oldest_first(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| (&a.lineage, a.generation).cmp(&(&b.lineage, b.generation)));
    for i in 1..candidates.len() {
        let (before, rest) = candidates.split_at_mut(i);
        let (previous, current) = (&before[i - 1], &mut rest[0]);
        if current.lineage.is_some() && current.lineage == previous.lineage {
            current.realtime = current.realtime.max(previous.realtime);
        }
    }
    candidates.sort_by(|a, b| {
        (a.realtime, &a.lineage, a.generation, &a.path).cmp(&(b.realtime, &b.lineage, b.generation, &b.path))
    });
}
