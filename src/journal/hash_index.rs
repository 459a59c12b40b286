//! Content-addressed lookup and dedup for FIELD and DATA objects.
//!
//! Each kind has a fixed-size bucket table allocated at file creation.
//! A bucket holds the offset of the newest object in its chain; every object
//! links to the next older one through `next_hash_offset`. Lookups compare the
//! full content at each node, never the hash alone.
//!
//! ```text
//! FIELD "MESSAGE" ──head_data──▶ DATA "MESSAGE=b" ──next_field──▶ DATA "MESSAGE=a" ──▶ 0
//! ```
//!
//! Inserting a DATA object first resolves the FIELD named by its payload and
//! pushes the new object onto that field's value chain.

use tracing::trace;

use crate::error::{AtlasError, Result};
use crate::format::{
    encode_data_like, field_name, Object, ObjectType, FIELD_LINK_OFFSET, HASH_BUCKET_SIZE,
    OBJECT_COMPRESSED_LZ4, OBJECT_HEADER_SIZE,
};
use crate::hash::hash_content;
use crate::strbuf::StringTable;

use super::JournalFile;

/// Which hash table to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Field,
    Data,
}

impl HashKind {
    fn object_type(self) -> ObjectType {
        match self {
            HashKind::Field => ObjectType::Field,
            HashKind::Data => ObjectType::Data,
        }
    }
}

/// Outcome of [`JournalFile::resolve_or_insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub offset: u64,
    pub hash: u64,
    /// False when identical content already existed
    pub inserted: bool,
}

impl JournalFile {
    /// Digest used to pick a bucket in this file
    pub fn hash(&self, content: &[u8]) -> u64 {
        hash_content(content, self.hash_key().as_ref())
    }

    fn table(&self, kind: HashKind) -> (u64, u64) {
        let h = &self.header;
        match kind {
            HashKind::Field => (h.field_hash_table_offset, h.field_buckets()),
            HashKind::Data => (h.data_hash_table_offset, h.data_buckets()),
        }
    }

    /// File offset of the bucket slot for `hash`
    fn bucket_slot(&self, kind: HashKind, hash: u64) -> Result<u64> {
        let (table, buckets) = self.table(kind);
        if table == 0 || buckets == 0 {
            return Err(AtlasError::CorruptFile(format!("{:?} hash table missing", kind)));
        }
        Ok(table + OBJECT_HEADER_SIZE + (hash % buckets) * HASH_BUCKET_SIZE)
    }

    /// Number of stored objects per bucket
    pub fn hash_table_fill(&self, kind: HashKind) -> f64 {
        let (_, buckets) = self.table(kind);
        let stored = match kind {
            HashKind::Field => self.header.n_fields,
            HashKind::Data => self.header.n_data,
        };
        if buckets == 0 {
            return 0.0;
        }
        stored as f64 / buckets as f64
    }

    /// Longest chain observed so far
    pub fn hash_chain_depth(&self, kind: HashKind) -> u64 {
        match kind {
            HashKind::Field => self.header.field_hash_chain_depth,
            HashKind::Data => self.header.data_hash_chain_depth,
        }
    }

    pub fn find_field(&self, name: &[u8]) -> Result<Option<u64>> {
        self.find(HashKind::Field, name)
    }

    pub fn find_data(&self, payload: &[u8]) -> Result<Option<u64>> {
        self.find(HashKind::Data, payload)
    }

    /// Offset of the object holding exactly `content`, if any
    pub fn find(&self, kind: HashKind, content: &[u8]) -> Result<Option<u64>> {
        let hash = self.hash(content);
        self.walk_chain(kind, content, hash).map(|(found, _)| found)
    }

    /// Walk the chain for `hash`; returns the match and the number of nodes visited
    fn walk_chain(&self, kind: HashKind, content: &[u8], hash: u64) -> Result<(Option<u64>, u64)> {
        let slot = self.bucket_slot(kind, hash)?;
        let mut offset = self.read_u64(slot)?;
        let mut depth = 0u64;

        while offset != 0 {
            depth += 1;
            if depth > self.header.n_objects {
                return Err(AtlasError::CorruptFile(format!(
                    "{:?} hash chain from bucket slot {} loops",
                    kind, slot
                )));
            }

            let (node_hash, next, payload) = match self.read_object(offset, Some(kind.object_type()))? {
                Object::Data(data) => (data.hash, data.next_hash_offset, data.payload),
                Object::Field(field) => (field.hash, field.next_hash_offset, field.payload),
                _ => return Err(AtlasError::corrupt_object(offset, "unexpected object in hash chain")),
            };
            if node_hash == hash && payload == content {
                return Ok((Some(offset), depth));
            }
            offset = next;
        }
        Ok((None, depth))
    }

    /// Return the offset of the object holding `content`, inserting it as the
    /// new head of its chain when no identical object exists.
    ///
    /// A new DATA object also resolves (or inserts) its FIELD and becomes the
    /// head of that field's value chain.
    pub fn resolve_or_insert(&mut self, kind: HashKind, content: &[u8]) -> Result<Resolved> {
        let hash = self.hash(content);
        let (found, depth) = self.walk_chain(kind, content, hash)?;
        if let Some(offset) = found {
            self.note_chain_depth(kind, depth);
            return Ok(Resolved {
                offset,
                hash,
                inserted: false,
            });
        }

        let field = match kind {
            HashKind::Data => {
                let field = self.resolve_or_insert(HashKind::Field, field_name(content))?;
                let head = self.read_u64(field.offset + FIELD_LINK_OFFSET)?;
                Some((field.offset, head))
            }
            HashKind::Field => None,
        };
        let field_link = field.map_or(0, |(_, head)| head);

        let slot = self.bucket_slot(kind, hash)?;
        let head = self.read_u64(slot)?;

        let compressed = match (kind, self.compress_threshold) {
            (HashKind::Data, Some(threshold)) if content.len() >= threshold => {
                let packed = lz4_flex::compress_prepend_size(content);
                (packed.len() < content.len()).then_some(packed)
            }
            _ => None,
        };
        let bytes = match &compressed {
            Some(packed) => {
                encode_data_like(kind.object_type(), OBJECT_COMPRESSED_LZ4, hash, head, field_link, packed)
            }
            None => encode_data_like(kind.object_type(), 0, hash, head, field_link, content),
        };

        let offset = self.append_object(&bytes)?;
        self.write_at(slot, &offset.to_le_bytes())?;
        if let Some((field_offset, _)) = field {
            self.write_at(field_offset + FIELD_LINK_OFFSET, &offset.to_le_bytes())?;
        }
        self.note_chain_depth(kind, depth + 1);
        trace!(?kind, offset, hash, compressed = compressed.is_some(), "inserted object");

        Ok(Resolved {
            offset,
            hash,
            inserted: true,
        })
    }

    fn note_chain_depth(&mut self, kind: HashKind, depth: u64) {
        let current = match kind {
            HashKind::Field => &mut self.header.field_hash_chain_depth,
            HashKind::Data => &mut self.header.data_hash_chain_depth,
        };
        *current = (*current).max(depth);
    }

    /// Every field name stored in this file, sorted
    pub fn field_names(&self) -> Result<Vec<Vec<u8>>> {
        let (table, buckets) = self.table(HashKind::Field);
        let mut names = Vec::new();
        for bucket in 0..buckets {
            let mut offset = self.read_u64(table + OBJECT_HEADER_SIZE + bucket * HASH_BUCKET_SIZE)?;
            let mut depth = 0u64;
            while offset != 0 {
                depth += 1;
                if depth > self.header.n_objects {
                    return Err(AtlasError::CorruptFile("field hash chain loops".to_string()));
                }
                let field = self.read_field(offset)?;
                offset = field.next_hash_offset;
                names.push(field.payload);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Offsets of every DATA object carrying field `name`, newest first
    pub fn field_data_offsets(&self, name: &[u8]) -> Result<Vec<u64>> {
        let Some(field) = self.find_field(name)? else {
            return Ok(Vec::new());
        };
        let mut offsets = Vec::new();
        let mut offset = self.read_field(field)?.head_data_offset;
        while offset != 0 {
            if offsets.len() as u64 >= self.header.n_data {
                return Err(AtlasError::CorruptFile(format!(
                    "value chain of field at {} loops",
                    field
                )));
            }
            offsets.push(offset);
            offset = self.read_data(offset)?.next_field_offset;
        }
        Ok(offsets)
    }

    /// Distinct values stored for field `name`, oldest first
    pub fn field_values(&self, name: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut values = Vec::new();
        for offset in self.field_data_offsets(name)?.into_iter().rev() {
            let data = self.read_data(offset)?;
            if field_name(&data.payload) != name {
                return Err(AtlasError::corrupt_object(offset, "DATA linked under the wrong field"));
            }
            let value = &data.payload[name.len()..];
            values.push(value.strip_prefix(b"=").unwrap_or(value).to_vec());
        }
        Ok(values)
    }

    /// Field names packed into a suffix-shared, NUL separated table
    pub fn field_string_table(&self) -> Result<StringTable> {
        Ok(StringTable::build(self.field_names()?))
    }
}
