//! Single writer for one stream.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::{Config, SyncStrategy};
use crate::error::{AtlasError, Result};
use crate::format::Header;
use crate::journal::{AppendedEntry, JournalFile, JournalFileOptions};
use crate::mmap::MmapCache;
use crate::rotation::{active_path, archived_path, disposed_path, validate_stream, Vacuum, VacuumLimits};
use crate::types::{realtime_now, Id128, Timestamps};

use super::policy::{RotationPolicy, RotationReason};

/// Where an entry ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub seqnum: u64,
    pub offset: u64,
    pub realtime: u64,
    /// File holding the entry (the active file at the time of the write)
    pub path: PathBuf,
    /// Whether the write rotated the active file first
    pub rotated: bool,
}

/// Appends entries to a stream's active file, rotating it when the policy or
/// a recoverable append failure calls for a fresh file.
///
/// ## Failure Handling
/// - Corruption-class append errors: archive, start a successor, retry the
///   same entry once. A second failure is returned.
/// - Resource and IO errors: returned without rotating.
pub struct JournalWriter {
    config: Config,
    cache: MmapCache,
    policy: RotationPolicy,
    vacuum_limits: VacuumLimits,
    active: Option<JournalFile>,
    unsynced: usize,
    #[cfg(test)]
    fail_appends: usize,
}

impl JournalWriter {
    /// Open the stream in `config.data_dir`, reusing a cleanly closed active
    /// file or setting aside an unusable one.
    pub fn open(config: Config, cache: MmapCache) -> Result<Self> {
        validate_stream(&config.stream)?;
        if config.max_file_size == 0 {
            return Err(AtlasError::Config("max_file_size must be positive".to_string()));
        }
        fs::create_dir_all(&config.data_dir).map_err(|e| AtlasError::from(e).with_path(&config.data_dir))?;

        let mut writer = Self {
            policy: RotationPolicy::from_config(&config),
            vacuum_limits: VacuumLimits::from_config(&config),
            config,
            cache,
            active: None,
            unsynced: 0,
            #[cfg(test)]
            fail_appends: 0,
        };
        writer.active = Some(writer.open_active()?);
        Ok(writer)
    }

    /// Write one entry stamped with the current time
    pub fn write_now<T: AsRef<[u8]>>(&mut self, items: &[T]) -> Result<WriteReceipt> {
        self.write(items, &Timestamps::now())
    }

    /// Write one entry made of `FIELD=value` items
    pub fn write<T: AsRef<[u8]>>(&mut self, items: &[T], timestamps: &Timestamps) -> Result<WriteReceipt> {
        let mut rotated = false;
        let reason = self
            .active
            .as_ref()
            .and_then(|file| self.policy.evaluate(file, timestamps.realtime));
        if let Some(reason) = reason {
            self.rotate_for(reason)?;
            rotated = true;
        }

        let appended = match self.append(items, timestamps) {
            Ok(appended) => appended,
            Err(e) if e.rotates_on_append() => {
                warn!(error = %e, "append failed, retrying in a fresh file");
                self.rotate_for(RotationReason::AppendFailed(e.to_string()))?;
                rotated = true;
                self.append(items, timestamps).map_err(|e| {
                    error!(error = %e, "append failed again after rotation");
                    e
                })?
            }
            Err(e) => return Err(e),
        };

        let path = self.active_path();
        self.unsynced += 1;
        self.maybe_sync()?;

        Ok(WriteReceipt {
            seqnum: appended.seqnum,
            offset: appended.offset,
            realtime: appended.realtime,
            path,
            rotated,
        })
    }

    fn append<T: AsRef<[u8]>>(&mut self, items: &[T], timestamps: &Timestamps) -> Result<AppendedEntry> {
        #[cfg(test)]
        if self.fail_appends > 0 {
            self.fail_appends -= 1;
            return Err(AtlasError::corrupt_object(0, "injected append failure"));
        }

        if self.active.is_none() {
            self.active = Some(self.open_active()?);
        }
        let boot_id = self.config.boot_id;
        match self.active.as_mut() {
            Some(file) => file.append_entry(items, timestamps, boot_id),
            None => Err(AtlasError::CorruptFile("no active journal file".to_string())),
        }
    }

    fn maybe_sync(&mut self) -> Result<()> {
        let due = match self.config.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced >= count.max(1),
            SyncStrategy::Never => false,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    /// fsync the active file
    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = &self.active {
            file.sync()?;
        }
        self.unsynced = 0;
        Ok(())
    }

    // =========================================================================
    // Rotation
    // =========================================================================

    /// Archive the active file and continue in a successor
    pub fn rotate(&mut self) -> Result<()> {
        self.rotate_for(RotationReason::Manual)
    }

    fn rotate_for(&mut self, reason: RotationReason) -> Result<()> {
        let Some(mut old) = self.active.take() else {
            self.active = Some(self.open_active()?);
            return Ok(());
        };
        info!(path = %old.path().display(), %reason, "rotating journal file");

        let previous = old.header().clone();
        if let Err(e) = old.archive() {
            warn!(path = %old.path().display(), error = %e, "failed to mark journal file archived");
        }
        let archived = archived_path(
            &self.config.data_dir,
            &self.config.stream,
            previous.stream_id,
            previous.generation,
            previous.head_entry_realtime,
        );
        old.rename(&archived)?;
        drop(old);
        self.unsynced = 0;

        self.active = Some(self.create_active(Some(&previous))?);
        self.vacuum();
        Ok(())
    }

    fn vacuum(&self) {
        if self.vacuum_limits.is_unlimited() {
            return;
        }
        let result = Vacuum::new(self.vacuum_limits)
            .stream(self.config.stream.clone())
            .exclude(self.cache.open_paths())
            .run(&self.config.data_dir);
        match result {
            Ok(report) => {
                for (path, reason) in &report.failures {
                    warn!(path = %path.display(), %reason, "vacuum could not remove file");
                }
                debug!(
                    removed = report.removed.len(),
                    freed = report.freed_bytes,
                    remaining = report.remaining_bytes,
                    "vacuum finished"
                );
            }
            Err(e) => warn!(error = %e, "vacuum failed"),
        }
    }

    // =========================================================================
    // Active File
    // =========================================================================

    /// Reopen the active file, or set it aside and start a new one when it
    /// cannot be appended to.
    fn open_active(&self) -> Result<JournalFile> {
        let path = active_path(&self.config.data_dir, &self.config.stream);
        let options = JournalFileOptions::from_config(&self.config);

        match JournalFile::open_for_append(&path, &options, &self.cache) {
            Ok(file) => {
                debug!(path = %path.display(), "reopened active journal file");
                Ok(file)
            }
            Err(AtlasError::NotFound(_)) => self.create_active(None),
            Err(e) if e.rotates_on_append() => {
                let previous = self.dispose(&path, &e)?;
                self.create_active(previous.as_ref())
            }
            Err(e) => Err(e),
        }
    }

    /// Create the active file, continuing the stream of `previous` if given
    fn create_active(&self, previous: Option<&Header>) -> Result<JournalFile> {
        let path = active_path(&self.config.data_dir, &self.config.stream);
        let mut options = JournalFileOptions::from_config(&self.config);
        if let Some(previous) = previous {
            options.stream_id = previous.stream_id;
            options.generation = previous.generation + 1;
            options.seqnum_base = previous.tail_entry_seqnum;
        }
        JournalFile::create(&path, &options, &self.cache)
    }

    /// Rename an unusable active file out of the way. Returns its header when
    /// it is still readable so the stream can continue.
    fn dispose(&self, path: &Path, reason: &AtlasError) -> Result<Option<Header>> {
        let header = JournalFile::open(path, &self.cache)
            .ok()
            .map(|file| file.header().clone());
        let (created, file_id) = header
            .as_ref()
            .map(|h| (h.created_realtime, h.file_id))
            .unwrap_or_else(|| (realtime_now(), Id128::random()));

        let target = disposed_path(&self.config.data_dir, &self.config.stream, created, file_id);
        fs::rename(path, &target).map_err(|e| AtlasError::from(e).with_path(path))?;
        warn!(
            from = %path.display(),
            to = %target.display(),
            error = %reason,
            "disposed unusable journal file"
        );
        Ok(header)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn active_file(&self) -> Option<&JournalFile> {
        self.active.as_ref()
    }

    pub fn active_path(&self) -> PathBuf {
        self.active
            .as_ref()
            .map(|file| file.path().to_path_buf())
            .unwrap_or_else(|| active_path(&self.config.data_dir, &self.config.stream))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &MmapCache {
        &self.cache
    }

    /// Sync and mark the active file offline
    pub fn close(mut self) -> Result<()> {
        if let Some(file) = self.active.take() {
            file.sync()?;
            file.close()?;
        }
        Ok(())
    }
}
