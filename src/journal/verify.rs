//! Full-file consistency check.
//!
//! Walks every object in arena order, then each field's value chain, then
//! every committed entry through the entry array chain, and finally
//! recomputes each seal.

use tracing::debug;

use crate::error::{AtlasError, Result};
use crate::format::{align, field_name, Object, TagObject};

use super::JournalFile;

/// What a successful verification saw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub objects: u64,
    pub entries: u64,
    pub data: u64,
    pub fields: u64,
    pub entry_arrays: u64,
    pub tags: u64,
    /// Entries covered by a seal
    pub sealed_entries: u64,
}

impl JournalFile {
    /// Verify the whole file, returning the first inconsistency found
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let tags = self.verify_objects(&mut report)?;
        let entries = self.verify_entries()?;
        report.entries = entries.len() as u64;

        for (offset, tag) in &tags {
            report.sealed_entries += self.verify_tag(*offset, tag, &entries)?;
        }

        debug!(
            path = %self.path.display(),
            objects = report.objects,
            entries = report.entries,
            tags = report.tags,
            "verified journal file"
        );
        Ok(report)
    }

    /// Sequential arena scan; returns the TAG objects found
    fn verify_objects(&self, report: &mut VerifyReport) -> Result<Vec<(u64, TagObject)>> {
        let h = &self.header;
        let end = h.arena_end();
        let mut offset = h.header_size;
        let mut last = 0u64;
        let mut tags = Vec::new();
        let mut fields = Vec::new();

        while offset < end {
            let size = self.object_header(offset)?.size;
            match self.read_object(offset, None)? {
                Object::Data(data) => {
                    if self.hash(&data.payload) != data.hash {
                        return Err(AtlasError::corrupt_object(offset, "DATA hash does not match payload"));
                    }
                    if self.find_data(&data.payload)? != Some(offset) {
                        return Err(AtlasError::corrupt_object(offset, "DATA object not reachable from its bucket"));
                    }
                    report.data += 1;
                }
                Object::Field(field) => {
                    if self.hash(&field.payload) != field.hash {
                        return Err(AtlasError::corrupt_object(offset, "FIELD hash does not match payload"));
                    }
                    if self.find_field(&field.payload)? != Some(offset) {
                        return Err(AtlasError::corrupt_object(offset, "FIELD object not reachable from its bucket"));
                    }
                    report.fields += 1;
                    fields.push(field.payload);
                }
                Object::EntryArray(_) => report.entry_arrays += 1,
                Object::Tag(tag) => {
                    report.tags += 1;
                    tags.push((offset, tag));
                }
                Object::Entry(_) | Object::HashTable(_) => {}
            }
            report.objects += 1;
            last = offset;
            offset = align(offset + size);
        }

        if last != h.tail_object_offset {
            return Err(AtlasError::CorruptFile(format!(
                "last object at {} but header tail object is {}",
                last, h.tail_object_offset
            )));
        }
        for (name, seen, recorded) in [
            ("objects", report.objects, h.n_objects),
            ("data", report.data, h.n_data),
            ("fields", report.fields, h.n_fields),
            ("entry arrays", report.entry_arrays, h.n_entry_arrays),
            ("tags", report.tags, h.n_tags),
        ] {
            if seen != recorded {
                return Err(AtlasError::CorruptFile(format!(
                    "found {} {} but header records {}",
                    seen, name, recorded
                )));
            }
        }
        self.verify_field_links(&fields, report.data)?;
        Ok(tags)
    }

    /// Every DATA object sits on exactly one value chain: its own field's
    fn verify_field_links(&self, fields: &[Vec<u8>], n_data: u64) -> Result<()> {
        let mut linked = 0u64;
        for name in fields {
            let mut previous = u64::MAX;
            for offset in self.field_data_offsets(name)? {
                if offset >= previous {
                    return Err(AtlasError::corrupt_object(offset, "field value chain out of order"));
                }
                let data = self.read_data(offset)?;
                if field_name(&data.payload) != name.as_slice() {
                    return Err(AtlasError::corrupt_object(offset, "DATA linked under the wrong field"));
                }
                previous = offset;
                linked += 1;
            }
        }
        if linked != n_data {
            return Err(AtlasError::CorruptFile(format!(
                "{} of {} DATA objects linked from their field",
                linked, n_data
            )));
        }
        Ok(())
    }

    /// Walk committed entries in order; returns (seqnum, offset) pairs
    fn verify_entries(&self) -> Result<Vec<(u64, u64)>> {
        let h = &self.header;
        let mut entries = Vec::new();

        for index in 0..h.n_entries {
            let offset = self.entry_offset_at(index)?.ok_or_else(|| {
                AtlasError::CorruptFile(format!("entry {} missing from entry array chain", index))
            })?;
            let entry = self.read_entry(offset)?;

            if let Some(&(previous, _)) = entries.last() {
                if entry.seqnum <= previous {
                    return Err(AtlasError::corrupt_object(
                        offset,
                        format!("seqnum {} does not follow {}", entry.seqnum, previous),
                    ));
                }
            } else if entry.seqnum != h.head_entry_seqnum {
                return Err(AtlasError::CorruptFile(format!(
                    "first entry has seqnum {} but header says {}",
                    entry.seqnum, h.head_entry_seqnum
                )));
            }
            if entry.items.is_empty() {
                return Err(AtlasError::corrupt_object(offset, "entry without items"));
            }

            let mut xor_hash = 0u64;
            for item in &entry.items {
                let data = self.read_data(item.object_offset)?;
                if item.hash.is_some_and(|hash| hash != data.hash) {
                    return Err(AtlasError::corrupt_object(offset, "entry item hash mismatch"));
                }
                xor_hash ^= data.hash;
            }
            if xor_hash != entry.xor_hash {
                return Err(AtlasError::corrupt_object(offset, "entry xor hash mismatch"));
            }
            entries.push((entry.seqnum, offset));
        }

        if let Some(&(seqnum, offset)) = entries.last() {
            if offset != h.tail_entry_offset || seqnum != h.tail_entry_seqnum {
                return Err(AtlasError::CorruptFile(format!(
                    "tail entry {}@{} disagrees with header {}@{}",
                    seqnum, offset, h.tail_entry_seqnum, h.tail_entry_offset
                )));
            }
        }
        Ok(entries)
    }

    /// Recompute one seal; returns how many entries it covers
    fn verify_tag(&self, offset: u64, tag: &TagObject, entries: &[(u64, u64)]) -> Result<u64> {
        if tag.first_seqnum > tag.seqnum {
            return Err(AtlasError::corrupt_object(offset, "seal range is empty"));
        }
        let from = entries.partition_point(|(seqnum, _)| *seqnum < tag.first_seqnum);
        let to = entries.partition_point(|(seqnum, _)| *seqnum <= tag.seqnum);

        let mut hasher = crc32fast::Hasher::new();
        for (_, entry_offset) in &entries[from..to] {
            hasher.update(&self.raw_object(*entry_offset)?);
        }
        if to == from || hasher.finalize() != tag.checksum {
            return Err(AtlasError::corrupt_object(
                offset,
                format!("seal over seqnums {}..={} does not match", tag.first_seqnum, tag.seqnum),
            ));
        }
        Ok((to - from) as u64)
    }
}
