//! Tests for the shared mmap window cache
//!
//! These tests verify:
//! - Hits, misses and LRU eviction across one and several files
//! - Ranges stay readable after their window is evicted
//! - Closing a file drops its windows
//! - Bounds checks against the file length
//! - Concurrent use from several threads

#[path = "../common/mod.rs"]
mod common;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use atlaslog::mmap::{CacheStats, MmapCache};
use atlaslog::AtlasError;

use common::setup_temp_dir;

const WINDOW: u64 = 64 * 1024;

// =============================================================================
// Helper Functions
// =============================================================================

fn pattern(offset: u64) -> u8 {
    (offset % 251) as u8
}

fn write_pattern_file(path: &Path, len: u64) -> Arc<File> {
    let bytes: Vec<u8> = (0..len).map(pattern).collect();
    let mut file = File::create(path).unwrap();
    file.write_all(&bytes).unwrap();
    file.sync_all().unwrap();
    Arc::new(File::open(path).unwrap())
}

fn assert_pattern(bytes: &[u8], offset: u64) {
    for (i, b) in bytes.iter().enumerate() {
        assert_eq!(*b, pattern(offset + i as u64), "byte {}", offset + i as u64);
    }
}

// =============================================================================
// Hit / Miss Tests
// =============================================================================

#[test]
fn test_window_reuse() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("a");
    let cache = MmapCache::new(2, WINDOW);
    let cached = cache.register(&path, write_pattern_file(&path, 4 * WINDOW));

    let first = cached.window(0, 16).unwrap();
    let second = cached.window(8, 8).unwrap();
    assert_pattern(&first, 0);
    assert_pattern(&second, 8);
    assert_eq!(second.len(), 8);

    assert_eq!(
        cache.stats(),
        CacheStats {
            hits: 1,
            misses: 1,
            evictions: 0,
            windows: 1,
        }
    );
}

#[test]
fn test_range_straddling_window_boundary() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("a");
    let cache = MmapCache::new(2, WINDOW);
    let cached = cache.register(&path, write_pattern_file(&path, 4 * WINDOW));

    let range = cached.window(WINDOW - 8, 16).unwrap();
    assert_eq!(range.len(), 16);
    assert_pattern(&range, WINDOW - 8);
}

#[test]
fn test_lru_eviction_order() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("a");
    let cache = MmapCache::new(2, WINDOW);
    let cached = cache.register(&path, write_pattern_file(&path, 4 * WINDOW));

    let evicted = cached.window(0, 16).unwrap();
    cached.window(WINDOW, 16).unwrap();
    cached.window(2 * WINDOW, 16).unwrap(); // evicts 0
    assert_eq!(cache.stats().evictions, 1);

    cached.window(WINDOW, 16).unwrap(); // hit, 2W is now oldest
    cached.window(0, 16).unwrap(); // evicts 2W
    cached.window(WINDOW, 16).unwrap(); // hit
    cached.window(2 * WINDOW, 16).unwrap(); // evicts 0

    assert_eq!(
        cache.stats(),
        CacheStats {
            hits: 2,
            misses: 5,
            evictions: 3,
            windows: 2,
        }
    );

    // A range handed out before eviction stays valid
    assert_pattern(&evicted, 0);
}

#[test]
fn test_eviction_spans_files() {
    let (_temp, dir) = setup_temp_dir();
    let (path_a, path_b) = (dir.join("a"), dir.join("b"));
    let cache = MmapCache::new(2, WINDOW);
    let a = cache.register(&path_a, write_pattern_file(&path_a, 2 * WINDOW));
    let b = cache.register(&path_b, write_pattern_file(&path_b, 2 * WINDOW));

    a.window(0, 8).unwrap();
    b.window(0, 8).unwrap();
    a.window(WINDOW, 8).unwrap(); // evicts a@0, the oldest overall
    assert_eq!(cache.stats().evictions, 1);

    b.window(0, 8).unwrap();
    assert_eq!(cache.stats().hits, 1);
    a.window(0, 8).unwrap();
    assert_eq!(cache.stats().misses, 4);
    assert_eq!(cache.stats().windows, 2);
}

#[test]
fn test_window_count_at_least_one() {
    assert_eq!(MmapCache::new(0, WINDOW).max_windows(), 1);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_drop_releases_windows() {
    let (_temp, dir) = setup_temp_dir();
    let (path_a, path_b) = (dir.join("a"), dir.join("b"));
    let cache = MmapCache::new(4, WINDOW);
    let a = cache.register(&path_a, write_pattern_file(&path_a, 2 * WINDOW));
    let b = cache.register(&path_b, write_pattern_file(&path_b, 2 * WINDOW));
    a.window(0, 8).unwrap();
    a.window(WINDOW, 8).unwrap();
    b.window(0, 8).unwrap();
    assert!(cache.is_open(&path_a));
    assert_eq!(cache.open_paths().len(), 2);

    drop(a);
    assert!(!cache.is_open(&path_a));
    assert!(cache.is_open(&path_b));
    assert_eq!(cache.stats().windows, 1);
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn test_rename_updates_registered_path() {
    let (_temp, dir) = setup_temp_dir();
    let (from, to) = (dir.join("from"), dir.join("to"));
    let cache = MmapCache::new(4, WINDOW);
    let mut cached = cache.register(&from, write_pattern_file(&from, WINDOW));

    std::fs::rename(&from, &to).unwrap();
    cached.set_path(&to);
    assert!(cache.is_open(&to));
    assert!(!cache.is_open(&from));
    assert_pattern(&cached.window(100, 10).unwrap(), 100);
}

#[test]
fn test_growing_file_is_remapped() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("a");
    let cache = MmapCache::new(4, WINDOW);
    let cached = cache.register(&path, write_pattern_file(&path, 100));
    assert_pattern(&cached.window(0, 50).unwrap(), 0);

    let mut writer = OpenOptions::new().append(true).open(&path).unwrap();
    let more: Vec<u8> = (100..200).map(pattern).collect();
    writer.write_all(&more).unwrap();
    writer.sync_all().unwrap();

    assert_pattern(&cached.window(100, 50).unwrap(), 100);
    assert_eq!(cache.stats().windows, 1);
}

// =============================================================================
// Bounds Tests
// =============================================================================

#[test]
fn test_range_past_end_is_corrupt() {
    let (_temp, dir) = setup_temp_dir();
    let path = dir.join("a");
    let cache = MmapCache::new(4, WINDOW);
    let cached = cache.register(&path, write_pattern_file(&path, 1000));

    for (offset, size) in [(990, 16), (1000, 1), (u64::MAX - 4, 16)] {
        let err = cached.window(offset, size).err().unwrap();
        assert!(
            matches!(err, AtlasError::CorruptObject { .. }),
            "{}+{}: {:?}",
            offset,
            size,
            err
        );
    }
    assert_eq!(cache.stats().windows, 0);
    assert_pattern(&cached.window(984, 16).unwrap(), 984);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_share_the_pool() {
    let (_temp, dir) = setup_temp_dir();
    let cache = MmapCache::new(3, WINDOW);
    let files: Vec<_> = (0..4)
        .map(|i| {
            let path = dir.join(format!("f{}", i));
            cache.register(&path, write_pattern_file(&path, 8 * WINDOW))
        })
        .collect();

    std::thread::scope(|scope| {
        for t in 0..4usize {
            let files = &files;
            scope.spawn(move || {
                for round in 0..200u64 {
                    let file = &files[(t + round as usize) % files.len()];
                    let offset = (round * 7919 + t as u64 * 104_729) % (8 * WINDOW - 64);
                    let range = file.window(offset, 64).unwrap();
                    assert_pattern(&range, offset);
                }
            });
        }
    });

    let stats = cache.stats();
    assert!(stats.windows <= 3);
    assert_eq!(stats.hits + stats.misses, 4 * 200);
}
