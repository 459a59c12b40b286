//! Typed object encoding and decoding.
//!
//! Decoding works on the exact byte range of one object (header included)
//! and turns every format violation into `CorruptObject`.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{AtlasError, Result};
use crate::types::Id128;

use super::{
    DATA_PAYLOAD_OFFSET, ENTRY_ARRAY_ITEMS_OFFSET, ENTRY_ITEMS_OFFSET, OBJECT_COMPRESSED_LZ4,
    OBJECT_FLAGS_SUPPORTED, OBJECT_HEADER_SIZE, TAG_SIZE,
};

/// Object type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Unused,
    Data,
    Field,
    Entry,
    EntryArray,
    HashTable,
    Tag,
}

impl ObjectType {
    pub fn to_u8(self) -> u8 {
        match self {
            ObjectType::Unused => 0,
            ObjectType::Data => 1,
            ObjectType::Field => 2,
            ObjectType::Entry => 3,
            ObjectType::EntryArray => 4,
            ObjectType::HashTable => 5,
            ObjectType::Tag => 6,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ObjectType::Unused,
            1 => ObjectType::Data,
            2 => ObjectType::Field,
            3 => ObjectType::Entry,
            4 => ObjectType::EntryArray,
            5 => ObjectType::HashTable,
            6 => ObjectType::Tag,
            _ => return None,
        })
    }

    /// Smallest legal declared size for this type
    pub fn min_size(self, compact: bool) -> u64 {
        match self {
            ObjectType::Unused => OBJECT_HEADER_SIZE,
            ObjectType::Data | ObjectType::Field => DATA_PAYLOAD_OFFSET,
            ObjectType::Entry => ENTRY_ITEMS_OFFSET + entry_item_size(compact),
            ObjectType::EntryArray => ENTRY_ARRAY_ITEMS_OFFSET + array_slot_size(compact),
            ObjectType::HashTable => OBJECT_HEADER_SIZE + super::HASH_BUCKET_SIZE,
            ObjectType::Tag => TAG_SIZE,
        }
    }
}

/// Bytes per entry item
pub(crate) fn entry_item_size(compact: bool) -> u64 {
    if compact {
        4
    } else {
        16
    }
}

/// Bytes per entry array slot
pub(crate) fn array_slot_size(compact: bool) -> u64 {
    if compact {
        4
    } else {
        8
    }
}

/// Common 16-byte object header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub object_type: ObjectType,
    pub flags: u8,
    pub size: u64,
}

impl ObjectHeader {
    pub fn decode(offset: u64, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < OBJECT_HEADER_SIZE as usize {
            return Err(AtlasError::corrupt_object(offset, "object header truncated"));
        }
        let object_type = ObjectType::from_u8(bytes[0]).ok_or_else(|| {
            AtlasError::corrupt_object(offset, format!("unknown object type {}", bytes[0]))
        })?;
        let flags = bytes[1];
        let size = (&bytes[8..16]).get_u64_le();
        Ok(Self {
            object_type,
            flags,
            size,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.object_type.to_u8());
        buf.put_u8(self.flags);
        buf.put_bytes(0, 6);
        buf.put_u64_le(self.size);
    }
}

// =============================================================================
// Typed Views
// =============================================================================

/// One `FIELD=value` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataObject {
    pub hash: u64,
    pub next_hash_offset: u64,
    /// Next older DATA object of the same field
    pub next_field_offset: u64,
    /// Always the uncompressed payload
    pub payload: Vec<u8>,
    pub compressed: bool,
}

/// One field name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldObject {
    pub hash: u64,
    pub next_hash_offset: u64,
    /// Newest DATA object carrying this field
    pub head_data_offset: u64,
    pub payload: Vec<u8>,
}

/// Field name of a `FIELD=value` payload: everything before the first `=`
pub fn field_name(payload: &[u8]) -> &[u8] {
    let eq = payload.iter().position(|&b| b == b'=').unwrap_or(payload.len());
    &payload[..eq]
}

/// Reference from an entry to a DATA object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryItem {
    pub object_offset: u64,
    /// Only stored by legacy files
    pub hash: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryObject {
    pub seqnum: u64,
    pub realtime: u64,
    pub monotonic: u64,
    pub boot_id: Id128,
    /// XOR of the hashes of all referenced DATA objects
    pub xor_hash: u64,
    pub items: Vec<EntryItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryArrayObject {
    pub next_entry_array_offset: u64,
    /// Entry offsets; zero marks a slot not yet filled
    pub items: Vec<u64>,
}

impl EntryArrayObject {
    pub fn capacity(&self) -> u64 {
        self.items.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTableObject {
    pub buckets: Vec<u64>,
}

/// Seal over the entries appended since the previous seal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagObject {
    /// Seqnum of the last sealed entry
    pub seqnum: u64,
    pub epoch: u64,
    /// Seqnum of the first sealed entry
    pub first_seqnum: u64,
    pub checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Data(DataObject),
    Field(FieldObject),
    Entry(EntryObject),
    EntryArray(EntryArrayObject),
    HashTable(HashTableObject),
    Tag(TagObject),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Data(_) => ObjectType::Data,
            Object::Field(_) => ObjectType::Field,
            Object::Entry(_) => ObjectType::Entry,
            Object::EntryArray(_) => ObjectType::EntryArray,
            Object::HashTable(_) => ObjectType::HashTable,
            Object::Tag(_) => ObjectType::Tag,
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a DATA or FIELD object.
///
/// `stored` is what goes to disk (possibly compressed); `hash` is always the
/// hash of the uncompressed content. `field_link` is `next_field_offset` for
/// DATA and `head_data_offset` for FIELD.
pub fn encode_data_like(
    object_type: ObjectType,
    flags: u8,
    hash: u64,
    next_hash_offset: u64,
    field_link: u64,
    stored: &[u8],
) -> BytesMut {
    let size = DATA_PAYLOAD_OFFSET + stored.len() as u64;
    let mut buf = BytesMut::with_capacity(size as usize);
    ObjectHeader {
        object_type,
        flags,
        size,
    }
    .encode(&mut buf);
    buf.put_u64_le(hash);
    buf.put_u64_le(next_hash_offset);
    buf.put_u64_le(field_link);
    buf.put_slice(stored);
    buf
}

pub fn encode_entry(entry: &EntryObject, compact: bool) -> BytesMut {
    let size = ENTRY_ITEMS_OFFSET + entry.items.len() as u64 * entry_item_size(compact);
    let mut buf = BytesMut::with_capacity(size as usize);
    ObjectHeader {
        object_type: ObjectType::Entry,
        flags: 0,
        size,
    }
    .encode(&mut buf);
    buf.put_u64_le(entry.seqnum);
    buf.put_u64_le(entry.realtime);
    buf.put_u64_le(entry.monotonic);
    buf.put_slice(entry.boot_id.as_bytes());
    buf.put_u64_le(entry.xor_hash);
    for item in &entry.items {
        if compact {
            buf.put_u32_le(item.object_offset as u32);
        } else {
            buf.put_u64_le(item.object_offset);
            buf.put_u64_le(item.hash.unwrap_or(0));
        }
    }
    buf
}

pub fn encode_tag(tag: &TagObject) -> BytesMut {
    let mut buf = BytesMut::with_capacity(TAG_SIZE as usize);
    ObjectHeader {
        object_type: ObjectType::Tag,
        flags: 0,
        size: TAG_SIZE,
    }
    .encode(&mut buf);
    buf.put_u64_le(tag.seqnum);
    buf.put_u64_le(tag.epoch);
    buf.put_u64_le(tag.first_seqnum);
    buf.put_u32_le(tag.checksum);
    buf.put_u32_le(0);
    buf
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one object from its exact byte range (`bytes.len() == header.size`).
pub fn decode_object(offset: u64, bytes: &[u8], compact: bool) -> Result<Object> {
    let header = ObjectHeader::decode(offset, bytes)?;
    if header.size != bytes.len() as u64 {
        return Err(AtlasError::corrupt_object(
            offset,
            format!("declared size {} but got {} bytes", header.size, bytes.len()),
        ));
    }
    if header.size < header.object_type.min_size(compact) {
        return Err(AtlasError::corrupt_object(
            offset,
            format!("{:?} object too small ({} bytes)", header.object_type, header.size),
        ));
    }
    if header.flags & !OBJECT_FLAGS_SUPPORTED != 0 {
        return Err(AtlasError::corrupt_object(
            offset,
            format!("unknown object flags {:#x}", header.flags),
        ));
    }
    if header.flags != 0 && header.object_type != ObjectType::Data {
        return Err(AtlasError::corrupt_object(
            offset,
            format!("flags set on {:?} object", header.object_type),
        ));
    }

    let mut body = &bytes[OBJECT_HEADER_SIZE as usize..];
    let object = match header.object_type {
        ObjectType::Unused => {
            return Err(AtlasError::corrupt_object(offset, "unused object type"));
        }
        ObjectType::Data => {
            let hash = body.get_u64_le();
            let next_hash_offset = body.get_u64_le();
            let next_field_offset = body.get_u64_le();
            let compressed = header.flags & OBJECT_COMPRESSED_LZ4 != 0;
            let payload = if compressed {
                lz4_flex::decompress_size_prepended(body).map_err(|e| {
                    AtlasError::corrupt_object(offset, format!("decompression failed: {}", e))
                })?
            } else {
                body.to_vec()
            };
            Object::Data(DataObject {
                hash,
                next_hash_offset,
                next_field_offset,
                payload,
                compressed,
            })
        }
        ObjectType::Field => {
            let hash = body.get_u64_le();
            let next_hash_offset = body.get_u64_le();
            let head_data_offset = body.get_u64_le();
            Object::Field(FieldObject {
                hash,
                next_hash_offset,
                head_data_offset,
                payload: body.to_vec(),
            })
        }
        ObjectType::Entry => {
            let seqnum = body.get_u64_le();
            let realtime = body.get_u64_le();
            let monotonic = body.get_u64_le();
            let boot_id = Id128::from_slice(body);
            body.advance(16);
            let xor_hash = body.get_u64_le();

            let item_size = entry_item_size(compact) as usize;
            if body.len() % item_size != 0 {
                return Err(AtlasError::corrupt_object(
                    offset,
                    format!("entry item list of {} bytes is not a multiple of {}", body.len(), item_size),
                ));
            }
            let mut items = Vec::with_capacity(body.len() / item_size);
            while body.has_remaining() {
                let item = if compact {
                    EntryItem {
                        object_offset: body.get_u32_le() as u64,
                        hash: None,
                    }
                } else {
                    EntryItem {
                        object_offset: body.get_u64_le(),
                        hash: Some(body.get_u64_le()),
                    }
                };
                if item.object_offset == 0 {
                    return Err(AtlasError::corrupt_object(offset, "entry item references offset 0"));
                }
                items.push(item);
            }
            Object::Entry(EntryObject {
                seqnum,
                realtime,
                monotonic,
                boot_id,
                xor_hash,
                items,
            })
        }
        ObjectType::EntryArray => {
            let next_entry_array_offset = body.get_u64_le();
            let slot_size = array_slot_size(compact) as usize;
            if body.len() % slot_size != 0 {
                return Err(AtlasError::corrupt_object(offset, "entry array size not slot aligned"));
            }
            let mut items = Vec::with_capacity(body.len() / slot_size);
            while body.has_remaining() {
                items.push(if compact {
                    body.get_u32_le() as u64
                } else {
                    body.get_u64_le()
                });
            }
            Object::EntryArray(EntryArrayObject {
                next_entry_array_offset,
                items,
            })
        }
        ObjectType::HashTable => {
            if body.len() % super::HASH_BUCKET_SIZE as usize != 0 {
                return Err(AtlasError::corrupt_object(offset, "hash table size not bucket aligned"));
            }
            let mut buckets = Vec::with_capacity(body.len() / 8);
            while body.has_remaining() {
                buckets.push(body.get_u64_le());
            }
            Object::HashTable(HashTableObject { buckets })
        }
        ObjectType::Tag => {
            if header.size != TAG_SIZE {
                return Err(AtlasError::corrupt_object(offset, "tag object has wrong size"));
            }
            Object::Tag(TagObject {
                seqnum: body.get_u64_le(),
                epoch: body.get_u64_le(),
                first_seqnum: body.get_u64_le(),
                checksum: body.get_u32_le(),
            })
        }
    };
    Ok(object)
}
