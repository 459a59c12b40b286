//! Atomic entry append and periodic sealing.
//!
//! ## Commit Order
//! ```text
//! FIELD/DATA objects ──▶ ENTRY object ──▶ entry array slot ──▶ header
//! ```
//! Nothing is visible to readers until the header is written. A failure at
//! any earlier step restores the entry-visible header fields, so the objects
//! already allocated become unreferenced garbage and no partial entry exists.

use tracing::{trace, warn};

use crate::error::{AtlasError, Result};
use crate::format::{encode_entry, encode_tag, EntryItem, EntryObject, TagObject};
use crate::types::{Id128, Timestamps};

use super::{HashKind, JournalFile};

/// Longest accepted field name
const MAX_FIELD_NAME_LEN: usize = 64;

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendedEntry {
    pub seqnum: u64,
    pub offset: u64,
    pub realtime: u64,
}

/// Running seal over the entries appended since the last TAG
#[derive(Debug, Clone)]
pub(crate) struct SealState {
    interval: u64,
    hasher: crc32fast::Hasher,
    first_seqnum: u64,
    pending: u64,
    epoch: u64,
}

impl SealState {
    pub(crate) fn new(interval: Option<u64>, epoch: u64, first_seqnum: u64) -> Option<Self> {
        interval.filter(|n| *n > 0).map(|interval| Self {
            interval,
            hasher: crc32fast::Hasher::new(),
            first_seqnum,
            pending: 0,
            epoch,
        })
    }
}

/// Check that `item` is a well-formed `FIELD=value` payload.
///
/// Field names are 1 to 64 bytes of `A-Z`, `0-9` and `_`, not starting with a
/// digit. The value may be any bytes, including none.
pub fn validate_item(item: &[u8]) -> Result<()> {
    let Some(eq) = item.iter().position(|&b| b == b'=') else {
        return Err(AtlasError::InvalidItem(format!(
            "missing '=' in {:?}",
            String::from_utf8_lossy(&item[..item.len().min(MAX_FIELD_NAME_LEN)])
        )));
    };
    let name = &item[..eq];
    if name.is_empty() {
        return Err(AtlasError::InvalidItem("empty field name".to_string()));
    }
    if name.len() > MAX_FIELD_NAME_LEN {
        return Err(AtlasError::InvalidItem(format!(
            "field name of {} bytes exceeds {}",
            name.len(),
            MAX_FIELD_NAME_LEN
        )));
    }
    if name[0].is_ascii_digit() {
        return Err(AtlasError::InvalidItem(format!(
            "field name {:?} starts with a digit",
            String::from_utf8_lossy(name)
        )));
    }
    if !name
        .iter()
        .all(|&b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(AtlasError::InvalidItem(format!(
            "field name {:?} has characters outside [A-Z0-9_]",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(())
}

impl JournalFile {
    /// Append one entry made of `items`, each a `FIELD=value` payload.
    ///
    /// Either the whole entry becomes visible or none of it does. Errors are
    /// returned as-is so the caller can decide whether to rotate.
    pub fn append_entry<T: AsRef<[u8]>>(
        &mut self,
        items: &[T],
        timestamps: &Timestamps,
        boot_id: Id128,
    ) -> Result<AppendedEntry> {
        if items.is_empty() {
            return Err(AtlasError::InvalidItem("entry has no items".to_string()));
        }
        for item in items {
            validate_item(item.as_ref())?;
        }

        let snapshot = self.header.clone();
        match self.append_entry_uncommitted(items, timestamps, boot_id) {
            Ok((appended, encoded)) => {
                self.seal_entry(&encoded);
                Ok(appended)
            }
            Err(e) => {
                self.header.restore_entry_fields(&snapshot);
                if let Err(write_err) = self.write_header() {
                    warn!(
                        path = %self.path.display(),
                        error = %write_err,
                        "failed to persist header after aborted append"
                    );
                }
                Err(e)
            }
        }
    }

    fn append_entry_uncommitted<T: AsRef<[u8]>>(
        &mut self,
        items: &[T],
        timestamps: &Timestamps,
        boot_id: Id128,
    ) -> Result<(AppendedEntry, Vec<u8>)> {
        let compact = self.is_compact();
        let mut entry_items = Vec::with_capacity(items.len());
        let mut xor_hash = 0u64;

        for item in items {
            let data = self.resolve_or_insert(HashKind::Data, item.as_ref())?;
            xor_hash ^= data.hash;
            entry_items.push(EntryItem {
                object_offset: data.offset,
                hash: (!compact).then_some(data.hash),
            });
        }

        let seqnum = self.header.tail_entry_seqnum + 1;
        let entry = EntryObject {
            seqnum,
            realtime: timestamps.realtime,
            monotonic: timestamps.monotonic,
            boot_id,
            xor_hash,
            items: entry_items,
        };
        let encoded = encode_entry(&entry, compact);
        let offset = self.append_object(&encoded)?;
        self.append_entry_ref(offset, seqnum, timestamps.realtime)?;

        let h = &mut self.header;
        if h.n_entries == 0 {
            h.head_entry_seqnum = seqnum;
            h.head_entry_realtime = timestamps.realtime;
        }
        h.tail_entry_seqnum = seqnum;
        h.tail_entry_realtime = timestamps.realtime;
        h.tail_entry_monotonic = timestamps.monotonic;
        h.tail_entry_offset = offset;
        h.boot_id = boot_id;
        h.n_entries += 1;
        self.write_header()?;

        trace!(seqnum, offset, items = items.len(), "appended entry");
        Ok((
            AppendedEntry {
                seqnum,
                offset,
                realtime: timestamps.realtime,
            },
            encoded.to_vec(),
        ))
    }

    /// Fold a committed entry into the running seal, writing a TAG once
    /// `interval` entries are pending. A failed TAG never fails the entry.
    fn seal_entry(&mut self, encoded: &[u8]) {
        let tag = {
            let Some(seal) = self.seal.as_mut() else {
                return;
            };
            seal.hasher.update(encoded);
            seal.pending += 1;
            if seal.pending < seal.interval {
                return;
            }
            TagObject {
                seqnum: self.header.tail_entry_seqnum,
                epoch: seal.epoch,
                first_seqnum: seal.first_seqnum,
                checksum: seal.hasher.clone().finalize(),
            }
        };

        let written = self
            .append_object(&encode_tag(&tag))
            .and_then(|_| self.write_header());
        match written {
            Ok(()) => {
                if let Some(seal) = self.seal.as_mut() {
                    seal.hasher = crc32fast::Hasher::new();
                    seal.first_seqnum = tag.seqnum + 1;
                    seal.pending = 0;
                    seal.epoch += 1;
                }
                trace!(epoch = tag.epoch, seqnum = tag.seqnum, "sealed entries");
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to append seal");
            }
        }
    }
}
