//! Configuration for AtlasLog
//!
//! Centralized configuration with sensible defaults. Parsing configuration
//! files is left to the embedding process; this is the in-memory form.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::Id128;

/// Main configuration for a journal stream
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding the stream's files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── {stream}.journal                      (active file)
    ///     ├── {stream}@{id}-{gen}-{time}.journal    (archived files)
    ///     └── {stream}@{time}-{id}.journal~         (disposed dirty files)
    pub data_dir: PathBuf,

    /// Logical stream name, also the active file's stem
    pub stream: String,

    /// Machine id recorded in every file header
    pub machine_id: Id128,

    /// Boot id recorded in every entry
    pub boot_id: Id128,

    // -------------------------------------------------------------------------
    // File Format Configuration
    // -------------------------------------------------------------------------
    /// Use 32-bit item and array offsets (files limited to 4 GiB)
    pub compact: bool,

    /// Compress DATA payloads of at least this many bytes (None = never)
    pub compress_threshold: Option<usize>,

    /// Key the content hash with the file id
    pub keyed_hash: bool,

    /// Append a seal (TAG object) every N entries
    pub seal_interval: Option<u64>,

    /// Sync strategy: how often to fsync the active file
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Rotation Configuration
    // -------------------------------------------------------------------------
    /// Soft size limit; the file is rotated once it is reached
    pub max_file_size: u64,

    /// Rotate once the oldest entry of the active file is this old
    pub max_file_age: Option<Duration>,

    // -------------------------------------------------------------------------
    // Vacuum Configuration
    // -------------------------------------------------------------------------
    /// Max bytes used by archived files
    pub max_use: Option<u64>,

    /// Max number of archived files
    pub max_files: Option<usize>,

    /// Delete archived files whose first entry is older than this
    pub max_retention: Option<Duration>,

    // -------------------------------------------------------------------------
    // Mapping Configuration
    // -------------------------------------------------------------------------
    /// Max number of mapped windows across all files sharing one cache
    pub mmap_max_windows: usize,

    /// Size of a mapped window (bytes)
    pub mmap_window_size: u64,

    // -------------------------------------------------------------------------
    // Reader Configuration
    // -------------------------------------------------------------------------
    /// Tie-break between files whose entries share timestamp and seqnum
    pub tie_break: TieBreak,
}

/// Sync strategy for the active file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },

    /// Only fsync on rotation and close
    Never,
}

/// Which file wins when two entries compare equal on (realtime, seqnum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Entries from the more recently created file come first
    #[default]
    NewestFirst,

    /// Entries from the older file come first
    OldestFirst,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./atlaslog_data"),
            stream: "system".to_string(),
            machine_id: Id128::NIL,
            boot_id: Id128::process_boot(),
            compact: true,
            compress_threshold: Some(512),
            keyed_hash: true,
            seal_interval: None,
            sync_strategy: SyncStrategy::EveryNEntries { count: 100 },
            max_file_size: 128 * 1024 * 1024, // 128 MB
            max_file_age: None,
            max_use: None,
            max_files: None,
            max_retention: None,
            mmap_max_windows: 64,
            mmap_window_size: 8 * 1024 * 1024, // 8 MB
            tie_break: TieBreak::NewestFirst,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the stream name
    pub fn stream(mut self, name: impl Into<String>) -> Self {
        self.config.stream = name.into();
        self
    }

    pub fn machine_id(mut self, id: Id128) -> Self {
        self.config.machine_id = id;
        self
    }

    pub fn boot_id(mut self, id: Id128) -> Self {
        self.config.boot_id = id;
        self
    }

    /// Choose compact (32-bit offsets) or legacy (64-bit offsets) encoding
    pub fn compact(mut self, compact: bool) -> Self {
        self.config.compact = compact;
        self
    }

    pub fn compress_threshold(mut self, threshold: Option<usize>) -> Self {
        self.config.compress_threshold = threshold;
        self
    }

    pub fn keyed_hash(mut self, keyed: bool) -> Self {
        self.config.keyed_hash = keyed;
        self
    }

    pub fn seal_interval(mut self, interval: Option<u64>) -> Self {
        self.config.seal_interval = interval;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the soft per-file size limit (in bytes)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    pub fn max_file_age(mut self, age: Option<Duration>) -> Self {
        self.config.max_file_age = age;
        self
    }

    pub fn max_use(mut self, bytes: Option<u64>) -> Self {
        self.config.max_use = bytes;
        self
    }

    pub fn max_files(mut self, count: Option<usize>) -> Self {
        self.config.max_files = count;
        self
    }

    pub fn max_retention(mut self, age: Option<Duration>) -> Self {
        self.config.max_retention = age;
        self
    }

    /// Set the maximum number of mapped windows
    pub fn mmap_max_windows(mut self, count: usize) -> Self {
        self.config.mmap_max_windows = count;
        self
    }

    /// Set the mapped window size (in bytes)
    pub fn mmap_window_size(mut self, size: u64) -> Self {
        self.config.mmap_window_size = size;
        self
    }

    pub fn tie_break(mut self, tie_break: TieBreak) -> Self {
        self.config.tie_break = tie_break;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
