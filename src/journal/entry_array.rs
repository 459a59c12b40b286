//! Entry array chain: the sequential index of every entry in a file.
//!
//! Arrays are chained through `next_entry_array_offset`. Capacity doubles
//! from one array to the next up to a cap, so small files stay small while
//! large files need few arrays. Every `skip_stride`-th array is remembered in
//! the header's skip table for seeking.

use crate::error::{AtlasError, Result};
use crate::format::{
    array_slot_size, ObjectType, SkipPointer, ENTRY_ARRAY_ITEMS_OFFSET, MAX_SKIP_POINTERS,
    OBJECT_HEADER_SIZE,
};

use super::JournalFile;

/// Slots in the first array of a file
const FIRST_ARRAY_CAPACITY: u64 = 4;

/// Arrays stop growing at this many slots
const MAX_ARRAY_CAPACITY: u64 = 4096;

/// Seek direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// First entry at or after the target
    Forward,
    /// Last entry at or before the target
    Backward,
}

/// What to seek by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    Seqnum(u64),
    /// Assumes wall clock timestamps do not go backwards within a file
    Realtime(u64),
}

impl SeekTarget {
    fn key_of_skip(&self, skip: &SkipPointer) -> u64 {
        match self {
            SeekTarget::Seqnum(_) => skip.first_seqnum,
            SeekTarget::Realtime(_) => skip.first_realtime,
        }
    }

    fn value(&self) -> u64 {
        match self {
            SeekTarget::Seqnum(v) | SeekTarget::Realtime(v) => *v,
        }
    }
}

/// Position of an entry in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    /// Zero-based position in the entry sequence
    pub index: u64,
    pub offset: u64,
}

impl JournalFile {
    /// Number of slots in the array at `offset`
    pub(crate) fn array_capacity(&self, offset: u64) -> Result<u64> {
        let header = self.object_header(offset)?;
        if header.object_type != ObjectType::EntryArray {
            return Err(AtlasError::corrupt_object(offset, "not an ENTRY_ARRAY object"));
        }
        Ok(header.size.saturating_sub(ENTRY_ARRAY_ITEMS_OFFSET) / array_slot_size(self.is_compact()))
    }

    fn slot_position(&self, array_offset: u64, index: u64) -> u64 {
        array_offset + ENTRY_ARRAY_ITEMS_OFFSET + index * array_slot_size(self.is_compact())
    }

    fn allocate_entry_array(&mut self, capacity: u64) -> Result<u64> {
        let size = ENTRY_ARRAY_ITEMS_OFFSET + capacity * array_slot_size(self.is_compact());
        self.allocate(ObjectType::EntryArray, size)
    }

    /// Link `entry_offset` at the end of the chain.
    ///
    /// Only the in-memory header is updated; the caller commits it.
    pub(crate) fn append_entry_ref(&mut self, entry_offset: u64, seqnum: u64, realtime: u64) -> Result<()> {
        let index = self.header.n_entries;
        let tail = self.header.tail_entry_array_offset;

        if self.header.entry_array_offset == 0 || tail == 0 {
            let array = self.allocate_entry_array(FIRST_ARRAY_CAPACITY)?;
            self.header.entry_array_offset = array;
            self.header.tail_entry_array_offset = array;
            self.header.tail_entry_array_n_entries = 0;
            self.header.skip_pointers.clear();
            self.header.skip_stride = 1;
            self.record_skip(0, array, index, seqnum, realtime);
        } else {
            let capacity = self.array_capacity(tail)?;
            if self.header.tail_entry_array_n_entries >= capacity {
                let next = self.next_array_for(tail, capacity)?;
                self.header.tail_entry_array_offset = next;
                self.header.tail_entry_array_n_entries = 0;
                let ordinal = self.header.n_entry_arrays.saturating_sub(1);
                self.record_skip(ordinal, next, index, seqnum, realtime);
            }
        }

        let array = self.header.tail_entry_array_offset;
        let slot = self.slot_position(array, self.header.tail_entry_array_n_entries);
        if self.is_compact() {
            self.write_at(slot, &(entry_offset as u32).to_le_bytes())?;
        } else {
            self.write_at(slot, &entry_offset.to_le_bytes())?;
        }
        self.header.tail_entry_array_n_entries += 1;
        Ok(())
    }

    /// The array following a full `tail`, reusing one linked by an earlier
    /// append that did not commit.
    fn next_array_for(&mut self, tail: u64, capacity: u64) -> Result<u64> {
        let linked = self.read_u64(tail + OBJECT_HEADER_SIZE)?;
        if linked != 0 {
            self.array_capacity(linked)?;
            return Ok(linked);
        }
        let next = self.allocate_entry_array((capacity * 2).min(MAX_ARRAY_CAPACITY))?;
        self.write_at(tail + OBJECT_HEADER_SIZE, &next.to_le_bytes())?;
        Ok(next)
    }

    fn record_skip(&mut self, ordinal: u64, array_offset: u64, first_index: u64, first_seqnum: u64, first_realtime: u64) {
        let h = &mut self.header;
        if h.skip_stride == 0 {
            h.skip_stride = 1;
        }
        if ordinal % h.skip_stride != 0 {
            return;
        }
        if h.skip_pointers.len() >= MAX_SKIP_POINTERS {
            h.skip_pointers = h.skip_pointers.iter().step_by(2).copied().collect();
            h.skip_stride *= 2;
            if ordinal % h.skip_stride != 0 {
                return;
            }
        }
        h.skip_pointers.push(SkipPointer {
            array_offset,
            first_index,
            first_seqnum,
            first_realtime,
        });
    }

    /// Closest known array at or before `index`: skip table, else chain head
    fn start_for_index(&self, index: u64) -> (u64, u64) {
        self.header
            .skip_pointers
            .iter()
            .rev()
            .find(|skip| skip.first_index <= index)
            .map(|skip| (skip.array_offset, skip.first_index))
            .unwrap_or((self.header.entry_array_offset, 0))
    }

    /// Offset of the `index`-th entry, or None past the committed entries
    pub fn entry_offset_at(&self, index: u64) -> Result<Option<u64>> {
        let n_entries = self.header.n_entries;
        if index >= n_entries {
            return Ok(None);
        }
        let (mut array, mut base) = self.start_for_index(index);
        let mut hops = 0u64;

        loop {
            hops += 1;
            if array == 0 || hops > self.header.n_entry_arrays.max(1) {
                return Err(AtlasError::CorruptFile(format!(
                    "entry array chain ends before entry {} of {}",
                    index, n_entries
                )));
            }
            let object = self.read_entry_array(array)?;
            let capacity = object.capacity();
            if index < base + capacity {
                let offset = object.items[(index - base) as usize];
                if offset == 0 {
                    return Err(AtlasError::corrupt_object(
                        array,
                        format!("empty slot for committed entry {}", index),
                    ));
                }
                return Ok(Some(offset));
            }
            base += capacity;
            array = object.next_entry_array_offset;
        }
    }

    fn entry_key(&self, target: &SeekTarget, offset: u64) -> Result<u64> {
        let entry = self.read_entry(offset)?;
        Ok(match target {
            SeekTarget::Seqnum(_) => entry.seqnum,
            SeekTarget::Realtime(_) => entry.realtime,
        })
    }

    /// First index whose entry does not satisfy `below(key)`.
    ///
    /// Entries are ordered by key, so `below` holds for a prefix. Starts at the
    /// last skip pointer inside that prefix and walks the chain, binary
    /// searching inside the array where the prefix ends.
    fn partition_point(&self, target: &SeekTarget, below: impl Fn(u64) -> bool) -> Result<u64> {
        let n_entries = self.header.n_entries;
        if n_entries == 0 {
            return Ok(0);
        }

        let (mut array, mut base) = self
            .header
            .skip_pointers
            .iter()
            .rev()
            .find(|skip| skip.first_index < n_entries && below(target.key_of_skip(skip)))
            .map(|skip| (skip.array_offset, skip.first_index))
            .unwrap_or((self.header.entry_array_offset, 0));

        let mut hops = 0u64;
        while array != 0 && base < n_entries {
            hops += 1;
            if hops > self.header.n_entry_arrays.max(1) {
                return Err(AtlasError::CorruptFile("entry array chain loops".to_string()));
            }
            let object = self.read_entry_array(array)?;
            let used = object.capacity().min(n_entries - base) as usize;
            if used == 0 {
                break;
            }

            let last = object.items[used - 1];
            if last == 0 {
                return Err(AtlasError::corrupt_object(array, "empty slot for committed entry"));
            }
            if below(self.entry_key(target, last)?) {
                base += used as u64;
                array = object.next_entry_array_offset;
                continue;
            }

            let (mut lo, mut hi) = (0usize, used - 1);
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                let offset = object.items[mid];
                if offset == 0 {
                    return Err(AtlasError::corrupt_object(array, "empty slot for committed entry"));
                }
                if below(self.entry_key(target, offset)?) {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            return Ok(base + lo as u64);
        }
        if base < n_entries {
            return Err(AtlasError::CorruptFile(format!(
                "entry array chain ends after {} of {} entries",
                base, n_entries
            )));
        }
        Ok(n_entries)
    }

    /// Locate the entry nearest to `target` in `direction`
    pub fn seek(&self, target: SeekTarget, direction: Direction) -> Result<Option<EntryLocation>> {
        let value = target.value();
        let index = match direction {
            Direction::Forward => {
                let index = self.partition_point(&target, |key| key < value)?;
                if index >= self.header.n_entries {
                    return Ok(None);
                }
                index
            }
            Direction::Backward => {
                let upper = self.partition_point(&target, |key| key <= value)?;
                if upper == 0 {
                    return Ok(None);
                }
                upper - 1
            }
        };
        Ok(self
            .entry_offset_at(index)?
            .map(|offset| EntryLocation { index, offset }))
    }
}
