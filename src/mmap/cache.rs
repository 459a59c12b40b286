//! Shared LRU cache of mapped windows.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{AtlasError, Result};

/// Windows start on multiples of this (a multiple of every common page size)
const WINDOW_ALIGNMENT: u64 = 64 * 1024;

/// Hit/miss/eviction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Windows currently cached
    pub windows: usize,
}

struct Window {
    start: u64,
    map: Arc<Mmap>,
    tick: u64,
}

impl Window {
    fn covers(&self, offset: u64, end: u64) -> bool {
        self.start <= offset && end <= self.start + self.map.len() as u64
    }
}

struct FileSlot {
    path: PathBuf,
    windows: Vec<Window>,
}

#[derive(Default)]
struct CacheState {
    tick: u64,
    files: HashMap<u64, FileSlot>,
    /// tick → (file key, window start); first entry is the LRU victim
    lru: BTreeMap<u64, (u64, u64)>,
    stats: CacheStats,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_to(&mut self, max_windows: usize) {
        while self.lru.len() > max_windows {
            let Some((_, (file_key, start))) = self.lru.pop_first() else {
                break;
            };
            if let Some(slot) = self.files.get_mut(&file_key) {
                slot.windows.retain(|w| w.start != start);
            }
            self.stats.evictions += 1;
        }
        self.stats.windows = self.lru.len();
    }
}

struct CacheInner {
    max_windows: usize,
    window_size: u64,
    next_file_key: AtomicU64,
    state: Mutex<CacheState>,
}

/// Process-wide window cache; cheap to clone, all clones share one pool
#[derive(Clone)]
pub struct MmapCache {
    inner: Arc<CacheInner>,
}

impl MmapCache {
    /// Create a cache holding at most `max_windows` windows of roughly
    /// `window_size` bytes each.
    pub fn new(max_windows: usize, window_size: u64) -> Self {
        let window_size = window_size.max(WINDOW_ALIGNMENT);
        let window_size = window_size.div_ceil(WINDOW_ALIGNMENT) * WINDOW_ALIGNMENT;
        Self {
            inner: Arc::new(CacheInner {
                max_windows: max_windows.max(1),
                window_size,
                next_file_key: AtomicU64::new(1),
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.mmap_max_windows, config.mmap_window_size)
    }

    /// Register an open file; its windows live until the handle is dropped
    pub fn register(&self, path: &Path, file: Arc<File>) -> CachedFile {
        let key = self.inner.next_file_key.fetch_add(1, Ordering::Relaxed);
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.inner.state.lock().files.insert(
            key,
            FileSlot {
                path: path.clone(),
                windows: Vec::new(),
            },
        );
        CachedFile {
            key,
            path,
            file,
            cache: self.clone(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.state.lock().stats
    }

    pub fn max_windows(&self) -> usize {
        self.inner.max_windows
    }

    /// Whether any registered (open) file lives at `path`
    pub fn is_open(&self, path: &Path) -> bool {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.inner
            .state
            .lock()
            .files
            .values()
            .any(|slot| slot.path == path)
    }

    /// Paths of every registered file
    pub fn open_paths(&self) -> Vec<PathBuf> {
        self.inner
            .state
            .lock()
            .files
            .values()
            .map(|slot| slot.path.clone())
            .collect()
    }

    fn lookup(&self, key: u64, offset: u64, end: u64) -> Option<MappedRange> {
        let mut state = self.inner.state.lock();
        let tick = state.next_tick();
        let slot = state.files.get_mut(&key)?;
        let window = slot.windows.iter_mut().find(|w| w.covers(offset, end))?;
        let old_tick = std::mem::replace(&mut window.tick, tick);
        let start = window.start;
        let range = MappedRange::new(Arc::clone(&window.map), start, offset, end);
        state.lru.remove(&old_tick);
        state.lru.insert(tick, (key, start));
        state.stats.hits += 1;
        Some(range)
    }

    fn insert(&self, key: u64, start: u64, map: Arc<Mmap>) {
        let mut state = self.inner.state.lock();
        let tick = state.next_tick();
        state.stats.misses += 1;
        let Some(slot) = state.files.get_mut(&key) else {
            // File was released meanwhile; the caller still holds its range.
            return;
        };
        let replaced: Vec<u64> = slot
            .windows
            .iter()
            .filter(|w| w.start == start)
            .map(|w| w.tick)
            .collect();
        slot.windows.retain(|w| w.start != start);
        slot.windows.push(Window { start, map, tick });
        for old in replaced {
            state.lru.remove(&old);
        }
        state.lru.insert(tick, (key, start));
        state.evict_to(self.inner.max_windows);
    }

    fn release(&self, key: u64) {
        let mut state = self.inner.state.lock();
        if let Some(slot) = state.files.remove(&key) {
            for window in slot.windows {
                state.lru.remove(&window.tick);
            }
        }
        state.stats.windows = state.lru.len();
    }
}

/// A file registered with the cache
pub struct CachedFile {
    key: u64,
    path: PathBuf,
    file: Arc<File>,
    cache: MmapCache,
}

impl CachedFile {
    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the file's new name after a rename
    pub fn set_path(&mut self, path: &Path) {
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(slot) = self.cache.inner.state.lock().files.get_mut(&self.key) {
            slot.path = path.clone();
        }
        self.path = path;
    }

    pub fn cache(&self) -> &MmapCache {
        &self.cache
    }

    /// Map `[offset, offset + size)`.
    ///
    /// Served from a cached window when one covers the range, otherwise a new
    /// aligned window is mapped, possibly evicting the least recently used
    /// window of any file.
    pub fn window(&self, offset: u64, size: u64) -> Result<MappedRange> {
        let size = size.max(1);
        let end = offset
            .checked_add(size)
            .ok_or_else(|| AtlasError::corrupt_object(offset, "range overflows"))?;

        if let Some(range) = self.cache.lookup(self.key, offset, end) {
            return Ok(range);
        }

        let file_len = self.file.metadata()?.len();
        if end > file_len {
            return Err(AtlasError::corrupt_object(
                offset,
                format!("range end {} beyond file length {}", end, file_len),
            ));
        }

        let window_size = self.cache.inner.window_size;
        let start = offset - offset % window_size;
        let wanted = (end - start).max(window_size);
        let len = wanted.min(file_len - start);

        // SAFETY: the mapping is read-only and never extends past the current
        // file length. Journal files only ever grow while open; vacuum never
        // removes a file that is registered with the cache.
        let map = unsafe {
            MmapOptions::new()
                .offset(start)
                .len(len as usize)
                .map(&*self.file)?
        };
        let map = Arc::new(map);
        let range = MappedRange::new(Arc::clone(&map), start, offset, end);
        self.cache.insert(self.key, start, map);
        Ok(range)
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        self.cache.release(self.key);
    }
}

/// Byte range inside a mapped window
pub struct MappedRange {
    map: Arc<Mmap>,
    from: usize,
    to: usize,
}

impl MappedRange {
    fn new(map: Arc<Mmap>, window_start: u64, offset: u64, end: u64) -> Self {
        Self {
            map,
            from: (offset - window_start) as usize,
            to: (end - window_start) as usize,
        }
    }
}

impl Deref for MappedRange {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map[self.from..self.to]
    }
}
