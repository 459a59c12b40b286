//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Once;

use atlaslog::journal::{JournalFile, JournalFileOptions};
use atlaslog::{Config, JournalWriter, MmapCache, SyncStrategy, Timestamps};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route library logs to the test harness; `RUST_LOG=debug` for detail
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn setup_temp_dir() -> (TempDir, PathBuf) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

pub fn test_cache() -> MmapCache {
    MmapCache::new(32, 256 * 1024)
}

/// Small files, no background syncing
pub fn test_config(dir: &Path, stream: &str) -> Config {
    Config::builder()
        .data_dir(dir)
        .stream(stream)
        .max_file_size(4 * 1024 * 1024)
        .sync_strategy(SyncStrategy::Never)
        .build()
}

pub fn file_options(config: &Config) -> JournalFileOptions {
    JournalFileOptions::from_config(config)
}

/// A fresh file at `dir/name`
pub fn create_file(dir: &Path, name: &str, config: &Config, cache: &MmapCache) -> JournalFile {
    JournalFile::create(&dir.join(name), &file_options(config), cache).unwrap()
}

/// Items of the `i`-th test entry
pub fn entry_items(i: u64) -> Vec<String> {
    vec![
        format!("MESSAGE=entry {}", i),
        format!("PRIORITY={}", i % 8),
        "SYSLOG_IDENTIFIER=atlaslog-test".to_string(),
    ]
}

/// Write `count` entries with realtime `start + i * step`
pub fn write_entries(writer: &mut JournalWriter, count: u64, start: u64, step: u64) {
    for i in 0..count {
        let ts = Timestamps::new(start + i * step, i);
        writer.write(&entry_items(i), &ts).unwrap();
    }
}

/// Overwrite bytes of a file in place, bypassing the library
pub fn overwrite(path: &Path, offset: u64, bytes: &[u8]) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.write_all_at(bytes, offset).unwrap();
    file.sync_all().unwrap();
}

/// Journal files in `dir` whose names end with `suffix`
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with(suffix))
        .collect();
    paths.sort();
    paths
}
