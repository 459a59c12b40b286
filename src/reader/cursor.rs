//! Position inside one file of a merged query.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::journal::{Direction, JournalFile, SeekTarget};
use crate::mmap::MmapCache;
use crate::types::Id128;

/// One entry as returned by the reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub seqnum: u64,
    pub realtime: u64,
    pub monotonic: u64,
    pub boot_id: Id128,
    /// `FIELD=value` payloads in the order they were written
    pub items: Vec<Vec<u8>>,
    /// File the entry was read from
    pub source: PathBuf,
    pub offset: u64,
}

impl JournalEntry {
    /// Value of the first item named `name`
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        let name = name.as_bytes();
        self.items.iter().find_map(|item| {
            (item.len() > name.len() && item.starts_with(name) && item[name.len()] == b'=')
                .then(|| &item[name.len() + 1..])
        })
    }

    /// `MESSAGE` as text, lossily decoded
    pub fn message(&self) -> Option<String> {
        self.field("MESSAGE")
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }
}

pub(crate) struct FileCursor {
    file: JournalFile,
    /// Smaller sorts first among entries with equal (realtime, seqnum)
    pub(crate) priority: u64,
    next_index: u64,
    current: Option<JournalEntry>,
}

impl FileCursor {
    pub(crate) fn open(path: &Path, cache: &MmapCache) -> Result<Self> {
        Ok(Self {
            file: JournalFile::open(path, cache)?,
            priority: 0,
            next_index: 0,
            current: None,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }

    /// Sort key for file priority: `(created_realtime, generation, path)`
    pub(crate) fn age_key(&self) -> (u64, u64, PathBuf) {
        let h = self.file.header();
        (h.created_realtime, h.generation, self.file.path().to_path_buf())
    }

    /// The entry at the cursor, reading it if needed.
    ///
    /// Once the known entries are used up the header is re-read, so entries
    /// committed by a concurrent writer show up.
    pub(crate) fn peek(&mut self) -> Result<Option<&JournalEntry>> {
        if self.current.is_none() {
            if self.next_index >= self.file.header().n_entries {
                self.file.refresh()?;
            }
            let Some(offset) = self.file.entry_offset_at(self.next_index)? else {
                return Ok(None);
            };
            let entry = self.file.read_entry(offset)?;
            let items = self.file.entry_payloads(&entry)?;
            self.current = Some(JournalEntry {
                seqnum: entry.seqnum,
                realtime: entry.realtime,
                monotonic: entry.monotonic,
                boot_id: entry.boot_id,
                items,
                source: self.file.path().to_path_buf(),
                offset,
            });
        }
        Ok(self.current.as_ref())
    }

    /// Take the peeked entry and move past it
    pub(crate) fn advance(&mut self) -> Option<JournalEntry> {
        let entry = self.current.take()?;
        self.next_index += 1;
        Some(entry)
    }

    pub(crate) fn seek_head(&mut self) {
        self.next_index = 0;
        self.current = None;
    }

    /// Position at the first entry with realtime ≥ `realtime`
    pub(crate) fn seek_realtime(&mut self, realtime: u64) -> Result<()> {
        self.file.refresh()?;
        self.current = None;
        self.next_index = match self.file.seek(SeekTarget::Realtime(realtime), Direction::Forward)? {
            Some(location) => location.index,
            None => self.file.header().n_entries,
        };
        Ok(())
    }

    /// Position at the entry with seqnum `seqnum` or the first one after it
    pub(crate) fn seek_seqnum(&mut self, seqnum: u64) -> Result<()> {
        self.file.refresh()?;
        self.current = None;
        self.next_index = match self.file.seek(SeekTarget::Seqnum(seqnum), Direction::Forward)? {
            Some(location) => location.index,
            None => self.file.header().n_entries,
        };
        Ok(())
    }
}
