//! Journal file header encoding, decoding and validation.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{AtlasError, Result};
use crate::types::Id128;

use super::{
    is_compact, ALIGNMENT, COMPATIBLE_SUPPORTED, HEADER_SIZE, INCOMPATIBLE_SUPPORTED, SIGNATURE,
};

/// Number of skip pointer slots in the header
pub const MAX_SKIP_POINTERS: usize = 16;

/// Offset of the skip pointer table inside the header
const SKIP_TABLE_OFFSET: usize = 320;

/// Lifecycle state of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Cleanly closed, may be reopened for append
    Offline,
    /// A writer has it open
    Online,
    /// Superseded by rotation, read-only forever
    Archived,
}

impl FileState {
    fn to_u8(self) -> u8 {
        match self {
            FileState::Offline => 0,
            FileState::Online => 1,
            FileState::Archived => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FileState::Offline),
            1 => Ok(FileState::Online),
            2 => Ok(FileState::Archived),
            other => Err(AtlasError::CorruptFile(format!("unknown file state {}", other))),
        }
    }
}

/// Sparse pointer into the entry array chain, used for seeking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkipPointer {
    pub array_offset: u64,
    /// Global index of the array's first slot
    pub first_index: u64,
    pub first_seqnum: u64,
    pub first_realtime: u64,
}

/// Decoded fixed header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub compatible_flags: u32,
    pub incompatible_flags: u32,
    pub state: FileState,
    pub file_id: Id128,
    pub machine_id: Id128,
    /// Boot id of the tail entry
    pub boot_id: Id128,
    /// Logical stream identity, shared by every generation of a stream
    pub stream_id: Id128,
    pub header_size: u64,
    pub arena_size: u64,
    pub data_hash_table_offset: u64,
    pub data_hash_table_size: u64,
    pub field_hash_table_offset: u64,
    pub field_hash_table_size: u64,
    pub tail_object_offset: u64,
    pub n_objects: u64,
    pub n_entries: u64,
    pub tail_entry_seqnum: u64,
    pub head_entry_seqnum: u64,
    /// Head of the entry array chain
    pub entry_array_offset: u64,
    pub head_entry_realtime: u64,
    pub tail_entry_realtime: u64,
    pub tail_entry_monotonic: u64,
    pub n_data: u64,
    pub n_fields: u64,
    pub n_tags: u64,
    pub n_entry_arrays: u64,
    pub tail_entry_array_offset: u64,
    pub tail_entry_array_n_entries: u64,
    pub tail_entry_offset: u64,
    /// Rotation generation, 0 for the first file of a stream
    pub generation: u64,
    pub created_realtime: u64,
    pub modified_realtime: u64,
    pub data_hash_chain_depth: u64,
    pub field_hash_chain_depth: u64,
    /// Record every `skip_stride`-th entry array in the skip table
    pub skip_stride: u64,
    pub skip_pointers: Vec<SkipPointer>,
}

impl Header {
    /// Header for a brand new file; hash tables are filled in by the creator
    pub fn new(
        incompatible_flags: u32,
        file_id: Id128,
        machine_id: Id128,
        stream_id: Id128,
        generation: u64,
        now: u64,
    ) -> Self {
        Self {
            compatible_flags: 0,
            incompatible_flags,
            state: FileState::Online,
            file_id,
            machine_id,
            boot_id: Id128::NIL,
            stream_id,
            header_size: HEADER_SIZE,
            arena_size: 0,
            data_hash_table_offset: 0,
            data_hash_table_size: 0,
            field_hash_table_offset: 0,
            field_hash_table_size: 0,
            tail_object_offset: 0,
            n_objects: 0,
            n_entries: 0,
            tail_entry_seqnum: 0,
            head_entry_seqnum: 0,
            entry_array_offset: 0,
            head_entry_realtime: 0,
            tail_entry_realtime: 0,
            tail_entry_monotonic: 0,
            n_data: 0,
            n_fields: 0,
            n_tags: 0,
            n_entry_arrays: 0,
            tail_entry_array_offset: 0,
            tail_entry_array_n_entries: 0,
            tail_entry_offset: 0,
            generation,
            created_realtime: now,
            modified_realtime: now,
            data_hash_chain_depth: 0,
            field_hash_chain_depth: 0,
            skip_stride: 1,
            skip_pointers: Vec::new(),
        }
    }

    pub fn is_compact(&self) -> bool {
        is_compact(self.incompatible_flags)
    }

    /// End of the arena: first byte past the last allocated object
    pub fn arena_end(&self) -> u64 {
        self.header_size + self.arena_size
    }

    pub fn data_buckets(&self) -> u64 {
        self.data_hash_table_size / super::HASH_BUCKET_SIZE
    }

    pub fn field_buckets(&self) -> u64 {
        self.field_hash_table_size / super::HASH_BUCKET_SIZE
    }

    /// Copy back the fields that make an entry visible, leaving the object
    /// allocation counters untouched.
    pub fn restore_entry_fields(&mut self, from: &Header) {
        self.n_entries = from.n_entries;
        self.tail_entry_seqnum = from.tail_entry_seqnum;
        self.head_entry_seqnum = from.head_entry_seqnum;
        self.head_entry_realtime = from.head_entry_realtime;
        self.tail_entry_realtime = from.tail_entry_realtime;
        self.tail_entry_monotonic = from.tail_entry_monotonic;
        self.tail_entry_offset = from.tail_entry_offset;
        self.boot_id = from.boot_id;
        self.entry_array_offset = from.entry_array_offset;
        self.tail_entry_array_offset = from.tail_entry_array_offset;
        self.tail_entry_array_n_entries = from.tail_entry_array_n_entries;
        self.skip_stride = from.skip_stride;
        self.skip_pointers = from.skip_pointers.clone();
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE as usize);
        buf.put_slice(SIGNATURE);
        buf.put_u32_le(self.compatible_flags);
        buf.put_u32_le(self.incompatible_flags);
        buf.put_u8(self.state.to_u8());
        buf.put_bytes(0, 7);
        buf.put_slice(self.file_id.as_bytes());
        buf.put_slice(self.machine_id.as_bytes());
        buf.put_slice(self.boot_id.as_bytes());
        buf.put_slice(self.stream_id.as_bytes());
        for value in [
            self.header_size,
            self.arena_size,
            self.data_hash_table_offset,
            self.data_hash_table_size,
            self.field_hash_table_offset,
            self.field_hash_table_size,
            self.tail_object_offset,
            self.n_objects,
            self.n_entries,
            self.tail_entry_seqnum,
            self.head_entry_seqnum,
            self.entry_array_offset,
            self.head_entry_realtime,
            self.tail_entry_realtime,
            self.tail_entry_monotonic,
            self.n_data,
            self.n_fields,
            self.n_tags,
            self.n_entry_arrays,
            self.tail_entry_array_offset,
            self.tail_entry_array_n_entries,
            self.tail_entry_offset,
            self.generation,
            self.created_realtime,
            self.modified_realtime,
            self.data_hash_chain_depth,
            self.field_hash_chain_depth,
            self.skip_pointers.len() as u64,
            self.skip_stride,
        ] {
            buf.put_u64_le(value);
        }
        debug_assert_eq!(buf.len(), SKIP_TABLE_OFFSET);
        for slot in 0..MAX_SKIP_POINTERS {
            let skip = self.skip_pointers.get(slot).copied().unwrap_or_default();
            buf.put_u64_le(skip.array_offset);
            buf.put_u64_le(skip.first_index);
            buf.put_u64_le(skip.first_seqnum);
            buf.put_u64_le(skip.first_realtime);
        }
        debug_assert_eq!(buf.len() as u64, HEADER_SIZE);
        buf
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    /// Decode the header, checking signature and feature flags.
    ///
    /// Structural checks against the file length happen in [`Header::validate`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(AtlasError::CorruptFile(format!(
                "header truncated: {} bytes, expected {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        if &bytes[0..8] != SIGNATURE {
            return Err(AtlasError::CorruptFile(format!(
                "invalid signature {:?}",
                &bytes[0..8]
            )));
        }

        let mut buf = &bytes[8..];
        let compatible_flags = buf.get_u32_le();
        let incompatible_flags = buf.get_u32_le();
        let unknown = incompatible_flags & !INCOMPATIBLE_SUPPORTED;
        if unknown != 0 {
            return Err(AtlasError::UnsupportedFeature(format!(
                "incompatible flags {:#x}",
                unknown
            )));
        }
        let state = FileState::from_u8(buf.get_u8())?;
        buf.advance(7);
        let file_id = Id128::from_slice(&buf[..16]);
        buf.advance(16);
        let machine_id = Id128::from_slice(&buf[..16]);
        buf.advance(16);
        let boot_id = Id128::from_slice(&buf[..16]);
        buf.advance(16);
        let stream_id = Id128::from_slice(&buf[..16]);
        buf.advance(16);

        let mut header = Header {
            compatible_flags,
            incompatible_flags,
            state,
            file_id,
            machine_id,
            boot_id,
            stream_id,
            header_size: buf.get_u64_le(),
            arena_size: buf.get_u64_le(),
            data_hash_table_offset: buf.get_u64_le(),
            data_hash_table_size: buf.get_u64_le(),
            field_hash_table_offset: buf.get_u64_le(),
            field_hash_table_size: buf.get_u64_le(),
            tail_object_offset: buf.get_u64_le(),
            n_objects: buf.get_u64_le(),
            n_entries: buf.get_u64_le(),
            tail_entry_seqnum: buf.get_u64_le(),
            head_entry_seqnum: buf.get_u64_le(),
            entry_array_offset: buf.get_u64_le(),
            head_entry_realtime: buf.get_u64_le(),
            tail_entry_realtime: buf.get_u64_le(),
            tail_entry_monotonic: buf.get_u64_le(),
            n_data: buf.get_u64_le(),
            n_fields: buf.get_u64_le(),
            n_tags: buf.get_u64_le(),
            n_entry_arrays: buf.get_u64_le(),
            tail_entry_array_offset: buf.get_u64_le(),
            tail_entry_array_n_entries: buf.get_u64_le(),
            tail_entry_offset: buf.get_u64_le(),
            generation: buf.get_u64_le(),
            created_realtime: buf.get_u64_le(),
            modified_realtime: buf.get_u64_le(),
            data_hash_chain_depth: buf.get_u64_le(),
            field_hash_chain_depth: buf.get_u64_le(),
            skip_stride: 0,
            skip_pointers: Vec::new(),
        };
        let n_skip = buf.get_u64_le();
        header.skip_stride = buf.get_u64_le();

        if n_skip > MAX_SKIP_POINTERS as u64 {
            return Err(AtlasError::CorruptFile(format!(
                "skip table claims {} slots",
                n_skip
            )));
        }
        for _ in 0..n_skip {
            header.skip_pointers.push(SkipPointer {
                array_offset: buf.get_u64_le(),
                first_index: buf.get_u64_le(),
                first_seqnum: buf.get_u64_le(),
                first_realtime: buf.get_u64_le(),
            });
        }

        Ok(header)
    }

    /// Structural validation against the current file length.
    ///
    /// Every pointer must be aligned and inside the arena; counters must be
    /// consistent with each other.
    pub fn validate(&self, file_len: u64) -> Result<()> {
        let corrupt = |msg: String| Err(AtlasError::CorruptFile(msg));

        if self.header_size < HEADER_SIZE || self.header_size % ALIGNMENT != 0 {
            return corrupt(format!("invalid header size {}", self.header_size));
        }
        if self.compatible_flags & !COMPATIBLE_SUPPORTED != 0 {
            tracing::debug!(
                flags = self.compatible_flags,
                "file carries unknown compatible flags"
            );
        }
        let end = match self.header_size.checked_add(self.arena_size) {
            Some(end) => end,
            None => return corrupt("arena size overflows".to_string()),
        };
        if end > file_len {
            return corrupt(format!(
                "arena ends at {} but file is {} bytes",
                end, file_len
            ));
        }
        if self.is_compact() && end > u32::MAX as u64 {
            return corrupt(format!("compact file arena ends at {}", end));
        }

        let in_arena = |offset: u64| {
            offset >= self.header_size && offset < end && offset % ALIGNMENT == 0
        };

        if self.n_objects == 0 {
            if self.tail_object_offset != 0 || self.arena_size != 0 {
                return corrupt("empty file with non-empty arena".to_string());
            }
        } else if !in_arena(self.tail_object_offset) {
            return corrupt(format!("tail object offset {} out of bounds", self.tail_object_offset));
        }

        for (name, offset, size) in [
            ("data", self.data_hash_table_offset, self.data_hash_table_size),
            ("field", self.field_hash_table_offset, self.field_hash_table_size),
        ] {
            if offset == 0 && size == 0 && self.n_objects == 0 {
                continue;
            }
            if !in_arena(offset) || size == 0 || size % super::HASH_BUCKET_SIZE != 0 {
                return corrupt(format!(
                    "{} hash table at {} with size {} is invalid",
                    name, offset, size
                ));
            }
            let room = (end - offset).checked_sub(super::OBJECT_HEADER_SIZE);
            if room.map_or(true, |room| size > room) {
                return corrupt(format!("{} hash table extends past the arena", name));
            }
        }

        // Every object carries at least its 16-byte header
        if self.n_objects > self.arena_size / super::OBJECT_HEADER_SIZE {
            return corrupt(format!(
                "{} objects cannot fit in a {} byte arena",
                self.n_objects, self.arena_size
            ));
        }
        for (name, count) in [
            ("entries", self.n_entries),
            ("data objects", self.n_data),
            ("fields", self.n_fields),
            ("tags", self.n_tags),
            ("entry arrays", self.n_entry_arrays),
        ] {
            if count > self.n_objects {
                return corrupt(format!(
                    "{} {} exceed {} objects",
                    count, name, self.n_objects
                ));
            }
        }

        if self.n_entries > 0 {
            for (name, offset) in [
                ("entry array", self.entry_array_offset),
                ("tail entry array", self.tail_entry_array_offset),
                ("tail entry", self.tail_entry_offset),
            ] {
                if !in_arena(offset) {
                    return corrupt(format!("{} offset {} out of bounds", name, offset));
                }
            }
            if self.head_entry_seqnum == 0 || self.head_entry_seqnum > self.tail_entry_seqnum {
                return corrupt(format!(
                    "seqnum range {}..{} is invalid",
                    self.head_entry_seqnum, self.tail_entry_seqnum
                ));
            }
        }

        if self.skip_stride == 0 && !self.skip_pointers.is_empty() {
            return corrupt("skip table with zero stride".to_string());
        }
        for skip in &self.skip_pointers {
            if !in_arena(skip.array_offset) || skip.first_index >= self.n_entries.max(1) {
                return corrupt(format!("skip pointer {:?} out of bounds", skip));
            }
        }

        Ok(())
    }
}
