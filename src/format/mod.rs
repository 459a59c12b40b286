//! Journal File Format
//!
//! Fixed header followed by an append-only arena of 8-byte aligned, typed,
//! length-prefixed objects. Objects reference each other purely by byte offset
//! from the start of the file.
//!
//! ## File Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (832 bytes)                                          │
//! │   Signature "ATLSJRNL" | flags | state | ids | counters     │
//! │   head/tail pointers | skip pointer table                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Arena (header.arena_size bytes)                             │
//! │   HASH_TABLE (fields) | HASH_TABLE (data) | DATA | FIELD    │
//! │   ENTRY | ENTRY_ARRAY | TAG | ... in allocation order       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Preallocated zero tail (not part of the arena)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Object Layout
//! ```text
//! ┌──────────┬──────────┬──────────────┬──────────┬─────────────┐
//! │ Type (1) │ Flags (1)│ Reserved (6) │ Size (8) │ Body        │
//! └──────────┴──────────┴──────────────┴──────────┴─────────────┘
//! ```
//!
//! Compact files (`INCOMPATIBLE_COMPACT`) store entry items and entry array
//! slots as 32-bit offsets; legacy files store 64-bit offsets and, for entry
//! items, the referenced object's hash.

mod header;
mod object;

pub use header::{FileState, Header, SkipPointer, MAX_SKIP_POINTERS};
pub use object::{
    decode_object, encode_data_like, encode_entry, encode_tag, field_name, DataObject, EntryArrayObject,
    EntryItem, EntryObject, FieldObject, HashTableObject, Object, ObjectHeader, ObjectType,
    TagObject,
};
pub(crate) use object::{array_slot_size, entry_item_size};

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic bytes identifying an AtlasLog journal file
pub const SIGNATURE: &[u8; 8] = b"ATLSJRNL";

/// Size of the header written by this implementation
pub const HEADER_SIZE: u64 = 832;

/// Every object starts on an 8-byte boundary
pub const ALIGNMENT: u64 = 8;

/// Object header: Type (1) + Flags (1) + Reserved (6) + Size (8)
pub const OBJECT_HEADER_SIZE: u64 = 16;

/// DATA `next_field_offset` / FIELD `head_data_offset`
pub const FIELD_LINK_OFFSET: u64 = OBJECT_HEADER_SIZE + 16;

/// Hash + next_hash_offset + field link before a DATA/FIELD payload
pub const DATA_PAYLOAD_OFFSET: u64 = OBJECT_HEADER_SIZE + 24;

/// Fixed ENTRY fields before the item list
pub const ENTRY_ITEMS_OFFSET: u64 = OBJECT_HEADER_SIZE + 48;

/// next_entry_array_offset before the slots
pub const ENTRY_ARRAY_ITEMS_OFFSET: u64 = OBJECT_HEADER_SIZE + 8;

/// TAG: seqnum + epoch + first_seqnum + checksum + padding
pub const TAG_SIZE: u64 = OBJECT_HEADER_SIZE + 32;

/// Bytes per hash table bucket (chain head offset)
pub const HASH_BUCKET_SIZE: u64 = 8;

/// Default bucket counts, fixed at creation
pub const DEFAULT_DATA_HASH_TABLE_BUCKETS: u64 = 2047;
pub const DEFAULT_FIELD_HASH_TABLE_BUCKETS: u64 = 333;

// -----------------------------------------------------------------------------
// Header flags
// -----------------------------------------------------------------------------

/// TAG objects are present
pub const COMPATIBLE_SEALED: u32 = 1 << 0;
pub const COMPATIBLE_SUPPORTED: u32 = COMPATIBLE_SEALED;

/// 32-bit item and array offsets
pub const INCOMPATIBLE_COMPACT: u32 = 1 << 0;
/// DATA payloads may be LZ4 compressed
pub const INCOMPATIBLE_COMPRESSED_LZ4: u32 = 1 << 1;
/// Content hash keyed with the file id
pub const INCOMPATIBLE_KEYED_HASH: u32 = 1 << 2;
pub const INCOMPATIBLE_SUPPORTED: u32 =
    INCOMPATIBLE_COMPACT | INCOMPATIBLE_COMPRESSED_LZ4 | INCOMPATIBLE_KEYED_HASH;

// -----------------------------------------------------------------------------
// Object flags
// -----------------------------------------------------------------------------

pub const OBJECT_COMPRESSED_LZ4: u8 = 1 << 0;
pub const OBJECT_FLAGS_SUPPORTED: u8 = OBJECT_COMPRESSED_LZ4;

/// Round up to the next object boundary
pub fn align(value: u64) -> u64 {
    (value + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Whether a file with these flags uses 32-bit offsets
pub fn is_compact(incompatible_flags: u32) -> bool {
    incompatible_flags & INCOMPATIBLE_COMPACT != 0
}
