//! Journal File Module
//!
//! One journal file: the object store plus the indexes built on top of it.
//!
//! ## Responsibilities
//! - Create, open and validate files (header pointers must resolve to valid,
//!   correctly typed objects)
//! - Allocate objects at the end of the arena, growing the file in steps
//! - Read and bounds-check objects through the shared mmap cache
//! - Content-addressed DATA/FIELD lookup with dedup (`hash_index`)
//! - Entry array chain with skip pointers (`entry_array`)
//! - Atomic entry append and sealing (`append`)
//! - Full-file verification (`verify`)
//!
//! ## Write Discipline
//! Writes go through `pwrite`; reads go through read-only shared mappings,
//! which observe those writes via the page cache. Committed bytes are never
//! rewritten: only hash bucket heads, empty entry array slots, array `next`
//! links and the header change after an object is written.

mod append;
mod entry_array;
mod hash_index;
mod verify;

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AtlasError, Result};
use crate::format::{
    align, decode_object, DataObject, EntryArrayObject, EntryObject, FieldObject, FileState,
    Header, Object, ObjectHeader, ObjectType, ALIGNMENT, DEFAULT_DATA_HASH_TABLE_BUCKETS,
    DEFAULT_FIELD_HASH_TABLE_BUCKETS, HASH_BUCKET_SIZE, HEADER_SIZE, INCOMPATIBLE_COMPACT,
    INCOMPATIBLE_COMPRESSED_LZ4, INCOMPATIBLE_KEYED_HASH, OBJECT_COMPRESSED_LZ4,
    OBJECT_HEADER_SIZE,
};
use crate::mmap::{CachedFile, MappedRange, MmapCache};
use crate::types::{realtime_now, Id128};

pub use append::{validate_item, AppendedEntry};
pub use entry_array::{Direction, EntryLocation, SeekTarget};
pub use hash_index::{HashKind, Resolved};
pub use verify::VerifyReport;

use append::SealState;

/// The file grows in steps of this many bytes
const FILE_GROW_STEP: u64 = 8 * 1024 * 1024;

/// Creation mode for new files
const FILE_MODE: u32 = 0o640;

/// Parameters for creating (or appending to) a file
#[derive(Debug, Clone)]
pub struct JournalFileOptions {
    pub machine_id: Id128,
    pub stream_id: Id128,
    pub generation: u64,
    /// Seqnum of the entry preceding this file's first entry
    pub seqnum_base: u64,
    pub compact: bool,
    pub compress_threshold: Option<usize>,
    pub keyed_hash: bool,
    pub seal_interval: Option<u64>,
    /// Hard limit on the file size
    pub max_size: u64,
    pub data_buckets: u64,
    pub field_buckets: u64,
}

impl JournalFileOptions {
    pub fn from_config(config: &Config) -> Self {
        // Hard limit leaves room above the soft rotation limit so the entry
        // that crosses it still fits.
        let max_size = config.max_file_size.saturating_add(config.max_file_size / 4);
        let max_size = if config.compact {
            max_size.min(u32::MAX as u64)
        } else {
            max_size
        };
        Self {
            machine_id: config.machine_id,
            stream_id: Id128::random(),
            generation: 0,
            seqnum_base: 0,
            compact: config.compact,
            compress_threshold: config.compress_threshold,
            keyed_hash: config.keyed_hash,
            seal_interval: config.seal_interval,
            max_size,
            // One bucket per 768 bytes of file, kept under 75% full
            data_buckets: (config.max_file_size / 576).max(DEFAULT_DATA_HASH_TABLE_BUCKETS),
            field_buckets: DEFAULT_FIELD_HASH_TABLE_BUCKETS,
        }
    }

    fn incompatible_flags(&self) -> u32 {
        let mut flags = 0;
        if self.compact {
            flags |= INCOMPATIBLE_COMPACT;
        }
        if self.compress_threshold.is_some() {
            flags |= INCOMPATIBLE_COMPRESSED_LZ4;
        }
        if self.keyed_hash {
            flags |= INCOMPATIBLE_KEYED_HASH;
        }
        flags
    }
}

/// One journal file, opened either for reading or for append
pub struct JournalFile {
    path: PathBuf,
    mapped: CachedFile,
    /// Authoritative for writers; a snapshot refreshed by `refresh()` for readers
    header: Header,
    writable: bool,
    /// Allocated file length (writers only)
    file_len: u64,
    max_size: u64,
    compress_threshold: Option<usize>,
    seal: Option<SealState>,
}

impl JournalFile {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create a new, empty file. Fails if `path` already exists.
    pub fn create(path: &Path, options: &JournalFileOptions, cache: &MmapCache) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(FILE_MODE)
            .open(path)
            .map_err(|e| AtlasError::from(e).with_path(path))?;
        let file = Arc::new(file);

        let now = realtime_now();
        let mut header = Header::new(
            options.incompatible_flags(),
            Id128::random(),
            options.machine_id,
            options.stream_id,
            options.generation,
            now,
        );
        header.tail_entry_seqnum = options.seqnum_base;

        let mut journal = Self {
            path: path.to_path_buf(),
            mapped: cache.register(path, Arc::clone(&file)),
            header,
            writable: true,
            file_len: 0,
            max_size: options.max_size.max(HEADER_SIZE + FILE_GROW_STEP),
            compress_threshold: options.compress_threshold,
            seal: SealState::new(options.seal_interval, 0, options.seqnum_base + 1),
        };
        if journal.seal.is_some() {
            journal.header.compatible_flags |= crate::format::COMPATIBLE_SEALED;
        }

        journal.grow(HEADER_SIZE)?;
        journal.write_header()?;

        let field_size = options.field_buckets.max(1) * HASH_BUCKET_SIZE;
        let field_table = journal.allocate(ObjectType::HashTable, OBJECT_HEADER_SIZE + field_size)?;
        journal.header.field_hash_table_offset = field_table;
        journal.header.field_hash_table_size = field_size;

        let data_size = options.data_buckets.max(1) * HASH_BUCKET_SIZE;
        let data_table = journal.allocate(ObjectType::HashTable, OBJECT_HEADER_SIZE + data_size)?;
        journal.header.data_hash_table_offset = data_table;
        journal.header.data_hash_table_size = data_size;

        journal.write_header()?;
        journal.sync()?;

        debug!(
            path = %path.display(),
            file_id = %journal.header.file_id,
            generation = journal.header.generation,
            "created journal file"
        );
        Ok(journal)
    }

    /// Open an existing file read-only
    pub fn open(path: &Path, cache: &MmapCache) -> Result<Self> {
        let file = File::open(path).map_err(|e| AtlasError::from(e).with_path(path))?;
        Self::open_with(path, Arc::new(file), cache)
    }

    /// Open an existing, cleanly closed file for append.
    ///
    /// A file still marked online was not closed cleanly and is refused with
    /// `CorruptFile`, as is an archived file.
    pub fn open_for_append(
        path: &Path,
        options: &JournalFileOptions,
        cache: &MmapCache,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| AtlasError::from(e).with_path(path))?;
        let mut journal = Self::open_with(path, Arc::new(file), cache)?;

        match journal.header.state {
            FileState::Offline => {}
            FileState::Online => {
                return Err(AtlasError::CorruptFile(format!(
                    "{} was not closed cleanly",
                    path.display()
                )))
            }
            FileState::Archived => {
                return Err(AtlasError::CorruptFile(format!(
                    "{} is archived",
                    path.display()
                )))
            }
        }

        journal.writable = true;
        journal.max_size = options.max_size.max(journal.header.arena_end());
        journal.compress_threshold = if journal.header.incompatible_flags
            & INCOMPATIBLE_COMPRESSED_LZ4
            != 0
        {
            options.compress_threshold
        } else {
            None
        };
        journal.seal = SealState::new(
            options.seal_interval,
            journal.header.n_tags,
            journal.header.tail_entry_seqnum + 1,
        );
        if journal.seal.is_some() {
            journal.header.compatible_flags |= crate::format::COMPATIBLE_SEALED;
        }
        journal.header.state = FileState::Online;
        journal.write_header()?;
        journal.sync()?;
        debug!(path = %path.display(), entries = journal.header.n_entries, "reopened journal file for append");
        Ok(journal)
    }

    /// Map and validate an existing file. The result is read-only until the
    /// caller has checked the file state.
    fn open_with(path: &Path, file: Arc<File>, cache: &MmapCache) -> Result<Self> {
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE {
            return Err(AtlasError::CorruptFile(format!(
                "{} is too short for a header ({} bytes)",
                path.display(),
                file_len
            )));
        }
        let mapped = cache.register(path, file);
        let header = {
            let bytes = mapped.window(0, HEADER_SIZE)?;
            Header::decode(&bytes)?
        };
        header.validate(file_len)?;

        let journal = Self {
            path: path.to_path_buf(),
            mapped,
            max_size: file_len,
            header,
            writable: false,
            file_len,
            compress_threshold: None,
            seal: None,
        };
        journal.check_pointers()?;
        Ok(journal)
    }

    /// Every head/tail pointer must resolve to an object of the right type
    fn check_pointers(&self) -> Result<()> {
        let h = &self.header;
        if h.n_objects == 0 {
            return Ok(());
        }
        self.read_object(h.field_hash_table_offset, Some(ObjectType::HashTable))?;
        self.read_object(h.data_hash_table_offset, Some(ObjectType::HashTable))?;
        self.object_header(h.tail_object_offset)?;
        if h.n_entries > 0 {
            self.read_object(h.entry_array_offset, Some(ObjectType::EntryArray))?;
            self.read_object(h.tail_entry_array_offset, Some(ObjectType::EntryArray))?;
            let tail = self.read_entry(h.tail_entry_offset)?;
            if tail.seqnum != h.tail_entry_seqnum {
                return Err(AtlasError::CorruptFile(format!(
                    "tail entry has seqnum {} but header says {}",
                    tail.seqnum, h.tail_entry_seqnum
                )));
            }
        }
        for skip in &h.skip_pointers {
            self.read_object(skip.array_offset, Some(ObjectType::EntryArray))?;
        }
        Ok(())
    }

    /// Re-read the header from disk (readers only), picking up entries
    /// committed since the last call.
    pub fn refresh(&mut self) -> Result<&Header> {
        if !self.writable {
            let file_len = self.mapped.file().metadata()?.len();
            let header = {
                let bytes = self.mapped.window(0, HEADER_SIZE)?;
                Header::decode(&bytes)?
            };
            header.validate(file_len)?;
            if header.file_id != self.header.file_id {
                return Err(AtlasError::CorruptFile(format!(
                    "{} changed identity while open",
                    self.path.display()
                )));
            }
            self.header = header;
        }
        Ok(&self.header)
    }

    /// Mark the file offline and sync it
    pub fn close(mut self) -> Result<()> {
        self.set_state(FileState::Offline)
    }

    /// Mark the file archived; it is never appended to again
    pub fn archive(&mut self) -> Result<()> {
        self.set_state(FileState::Archived)?;
        debug!(path = %self.path.display(), entries = self.header.n_entries, "archived journal file");
        Ok(())
    }

    fn set_state(&mut self, state: FileState) -> Result<()> {
        if !self.writable || self.header.state == state {
            return Ok(());
        }
        self.header.state = state;
        self.write_header()?;
        self.sync()
    }

    /// Rename the file on disk, keeping it open
    pub fn rename(&mut self, to: &Path) -> Result<()> {
        fs::rename(&self.path, to).map_err(|e| AtlasError::from(e).with_path(&self.path))?;
        self.mapped.set_path(to);
        self.path = to.to_path_buf();
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if self.writable {
            self.mapped.file().sync_data()?;
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_compact(&self) -> bool {
        self.header.is_compact()
    }

    pub fn file_id(&self) -> Id128 {
        self.header.file_id
    }

    /// Bytes used by header and arena
    pub fn used_size(&self) -> u64 {
        self.header.arena_end()
    }

    /// Hard size limit for this file
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub(crate) fn hash_key(&self) -> Option<Id128> {
        (self.header.incompatible_flags & INCOMPATIBLE_KEYED_HASH != 0)
            .then_some(self.header.file_id)
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a zero-filled object of `size` bytes and return its offset
    pub fn allocate(&mut self, object_type: ObjectType, size: u64) -> Result<u64> {
        if size < OBJECT_HEADER_SIZE {
            return Err(AtlasError::corrupt_object(0, format!("object size {} too small", size)));
        }
        let mut bytes = bytes::BytesMut::with_capacity(size as usize);
        ObjectHeader {
            object_type,
            flags: 0,
            size,
        }
        .encode(&mut bytes);
        bytes.resize(size as usize, 0);
        self.append_object(&bytes)
    }

    /// Write a fully encoded object at the end of the arena
    pub(crate) fn append_object(&mut self, bytes: &[u8]) -> Result<u64> {
        if !self.writable {
            return Err(AtlasError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "journal file opened read-only",
            )));
        }
        let header = ObjectHeader::decode(0, bytes)?;
        let size = bytes.len() as u64;
        let offset = align(self.header.arena_end());
        let end = offset + size;
        if end > self.max_size {
            return Err(AtlasError::FileFull(format!(
                "{} bytes needed, limit is {}",
                end, self.max_size
            )));
        }

        self.grow(end)?;
        self.write_at(offset, bytes)?;

        let h = &mut self.header;
        h.arena_size = end - h.header_size;
        h.tail_object_offset = offset;
        h.n_objects += 1;
        match header.object_type {
            ObjectType::Data => h.n_data += 1,
            ObjectType::Field => h.n_fields += 1,
            ObjectType::EntryArray => h.n_entry_arrays += 1,
            ObjectType::Tag => h.n_tags += 1,
            _ => {}
        }
        Ok(offset)
    }

    /// Make sure the file is at least `end` bytes long
    fn grow(&mut self, end: u64) -> Result<()> {
        if end <= self.file_len {
            return Ok(());
        }
        let target = end.div_ceil(FILE_GROW_STEP) * FILE_GROW_STEP;
        let target = target.min(self.max_size.max(end));
        self.mapped.file().set_len(target)?;
        self.file_len = target;
        Ok(())
    }

    pub(crate) fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.mapped.file().write_all_at(bytes, offset)?;
        Ok(())
    }

    pub(crate) fn write_header(&mut self) -> Result<()> {
        self.header.modified_realtime = realtime_now();
        let bytes = self.header.encode();
        self.write_at(0, &bytes)
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Validate and map the object header at `offset`
    pub fn object_header(&self, offset: u64) -> Result<ObjectHeader> {
        self.object_bytes(offset).map(|(header, _)| header)
    }

    fn object_bytes(&self, offset: u64) -> Result<(ObjectHeader, MappedRange)> {
        let end = self.header.arena_end();
        if offset < self.header.header_size {
            return Err(AtlasError::corrupt_object(offset, "offset inside the header"));
        }
        if offset % ALIGNMENT != 0 {
            return Err(AtlasError::corrupt_object(offset, "offset not aligned"));
        }
        if offset.saturating_add(OBJECT_HEADER_SIZE) > end {
            return Err(AtlasError::corrupt_object(
                offset,
                format!("object header beyond arena end {}", end),
            ));
        }

        let header = {
            let bytes = self.mapped.window(offset, OBJECT_HEADER_SIZE)?;
            ObjectHeader::decode(offset, &bytes)?
        };
        if header.object_type == ObjectType::Unused {
            return Err(AtlasError::corrupt_object(offset, "unused object"));
        }
        if header.size < OBJECT_HEADER_SIZE || header.size > end - offset {
            return Err(AtlasError::corrupt_object(
                offset,
                format!(
                    "declared size {} inconsistent with {} remaining bytes",
                    header.size,
                    end - offset
                ),
            ));
        }
        let range = self.mapped.window(offset, header.size)?;
        Ok((header, range))
    }

    /// Read and decode the object at `offset`, checking its type
    pub fn read_object(&self, offset: u64, expected: Option<ObjectType>) -> Result<Object> {
        let (header, bytes) = self.object_bytes(offset)?;
        if let Some(expected) = expected {
            if header.object_type != expected {
                return Err(AtlasError::corrupt_object(
                    offset,
                    format!("expected {:?}, found {:?}", expected, header.object_type),
                ));
            }
        }
        if header.flags & OBJECT_COMPRESSED_LZ4 != 0
            && self.header.incompatible_flags & INCOMPATIBLE_COMPRESSED_LZ4 == 0
        {
            return Err(AtlasError::corrupt_object(
                offset,
                "compressed object in a file without compression",
            ));
        }
        decode_object(offset, &bytes, self.is_compact())
    }

    /// Raw bytes of the object at `offset`
    pub(crate) fn raw_object(&self, offset: u64) -> Result<MappedRange> {
        self.object_bytes(offset).map(|(_, bytes)| bytes)
    }

    pub fn read_data(&self, offset: u64) -> Result<DataObject> {
        match self.read_object(offset, Some(ObjectType::Data))? {
            Object::Data(data) => Ok(data),
            _ => Err(AtlasError::corrupt_object(offset, "not a DATA object")),
        }
    }

    pub fn read_field(&self, offset: u64) -> Result<FieldObject> {
        match self.read_object(offset, Some(ObjectType::Field))? {
            Object::Field(field) => Ok(field),
            _ => Err(AtlasError::corrupt_object(offset, "not a FIELD object")),
        }
    }

    pub fn read_entry(&self, offset: u64) -> Result<EntryObject> {
        match self.read_object(offset, Some(ObjectType::Entry))? {
            Object::Entry(entry) => Ok(entry),
            _ => Err(AtlasError::corrupt_object(offset, "not an ENTRY object")),
        }
    }

    pub fn read_entry_array(&self, offset: u64) -> Result<EntryArrayObject> {
        match self.read_object(offset, Some(ObjectType::EntryArray))? {
            Object::EntryArray(array) => Ok(array),
            _ => Err(AtlasError::corrupt_object(offset, "not an ENTRY_ARRAY object")),
        }
    }

    /// Read a little-endian u64 at `offset` (bucket heads, array links)
    pub(crate) fn read_u64(&self, offset: u64) -> Result<u64> {
        let bytes = self.mapped.window(offset, 8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(out))
    }

    /// Payloads referenced by `entry`, in item order
    pub fn entry_payloads(&self, entry: &EntryObject) -> Result<Vec<Vec<u8>>> {
        entry
            .items
            .iter()
            .map(|item| {
                let data = self.read_data(item.object_offset)?;
                if let Some(hash) = item.hash {
                    if hash != data.hash {
                        return Err(AtlasError::corrupt_object(
                            item.object_offset,
                            "entry item hash does not match DATA object",
                        ));
                    }
                }
                Ok(data.payload)
            })
            .collect()
    }
}

impl Drop for JournalFile {
    fn drop(&mut self) {
        if self.writable && self.header.state == FileState::Online {
            if let Err(e) = self.set_state(FileState::Offline) {
                warn!(path = %self.path.display(), error = %e, "failed to mark journal file offline");
            }
        }
    }
}
