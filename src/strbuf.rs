//! Suffix-sharing string table builder.
//!
//! Strings are stored NUL terminated in one growing buffer. A string that is
//! a suffix of one already stored is not stored again: its offset points into
//! the longer string. Lookup uses a trie over the strings read backwards, so
//! shared suffixes share a path from the root.
//!
//! ```text
//! add("waldo")  → 1    buffer: \0waldo\0
//! add("aldo")   → 2    (suffix of "waldo", nothing appended)
//! add("foo")    → 7    buffer: \0waldo\0foo\0
//! add("")       → 0    (the root: the leading NUL)
//! ```
//!
//! Only suffixes of strings already in the trie are found. Adding "waldo"
//! after "do" appends a second copy; callers wanting maximal sharing add
//! longer strings first.

/// Trie node: a stored string and children keyed by the preceding byte
#[derive(Debug)]
struct Node {
    value_off: usize,
    value_len: usize,
    /// Sorted by byte for binary search
    children: Vec<(u8, usize)>,
}

/// Insertion statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuffixStats {
    /// Trie nodes including the root
    pub nodes: usize,
    /// Strings passed to `add`
    pub in_count: usize,
    /// Bytes passed to `add`, without terminators
    pub in_len: usize,
    /// Strings served from existing bytes
    pub dedup_count: usize,
    /// Bytes saved by those strings
    pub dedup_len: usize,
}

/// Builder for a deduplicated, NUL separated string table
#[derive(Debug)]
pub struct SuffixBuffer {
    buf: Vec<u8>,
    nodes: Vec<Node>,
    in_count: usize,
    in_len: usize,
    dedup_count: usize,
    dedup_len: usize,
}

impl Default for SuffixBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SuffixBuffer {
    /// Empty table: a single NUL, which is the empty string at offset 0
    pub fn new() -> Self {
        Self {
            buf: vec![0],
            nodes: vec![Node {
                value_off: 0,
                value_len: 0,
                children: Vec::new(),
            }],
            in_count: 0,
            in_len: 0,
            dedup_count: 0,
            dedup_len: 0,
        }
    }

    /// Add `s` and return the offset at which it can be read back
    pub fn add(&mut self, s: &[u8]) -> usize {
        let len = s.len();
        self.in_count += 1;
        self.in_len += len;

        let mut node = 0usize;
        let mut depth = 0usize;
        let mut parent_key = None;

        while depth <= len {
            let current = &self.nodes[node];
            if current.value_len >= len {
                let off = current.value_off + current.value_len - len;
                if depth == len || self.buf[off..off + len] == *s {
                    self.dedup_count += 1;
                    self.dedup_len += len;
                    return off;
                }
            }
            if depth == len {
                break;
            }

            let c = s[len - 1 - depth];
            match current.children.binary_search_by_key(&c, |(key, _)| *key) {
                Ok(pos) => node = current.children[pos].1,
                Err(_) => {
                    parent_key = Some(c);
                    break;
                }
            }
            depth += 1;
        }

        let off = self.buf.len();
        self.buf.extend_from_slice(s);
        self.buf.push(0);

        let child = self.nodes.len();
        self.nodes.push(Node {
            value_off: off,
            value_len: len,
            children: Vec::new(),
        });
        if let Some(c) = parent_key {
            let children = &mut self.nodes[node].children;
            if let Err(pos) = children.binary_search_by_key(&c, |(key, _)| *key) {
                children.insert(pos, (c, child));
            }
        }
        off
    }

    /// Bytes in the table so far, including terminators
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Never true: the table always holds the empty string
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn stats(&self) -> SuffixStats {
        SuffixStats {
            nodes: self.nodes.len(),
            in_count: self.in_count,
            in_len: self.in_len,
            dedup_count: self.dedup_count,
            dedup_len: self.dedup_len,
        }
    }

    /// Drop the trie and keep only the buffer
    pub fn complete(self) -> Vec<u8> {
        self.buf
    }
}

/// A finished table plus the offset of every string that went in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    pub buffer: Vec<u8>,
    pub offsets: Vec<(Vec<u8>, usize)>,
}

impl StringTable {
    /// Build a table from `strings`, longest first so suffixes are shared
    pub fn build<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut strings: Vec<Vec<u8>> = strings.into_iter().map(|s| s.as_ref().to_vec()).collect();
        strings.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut buffer = SuffixBuffer::new();
        let mut offsets = Vec::with_capacity(strings.len());
        for s in strings {
            let off = buffer.add(&s);
            offsets.push((s, off));
        }
        offsets.sort();
        Self {
            buffer: buffer.complete(),
            offsets,
        }
    }

    /// The NUL terminated string starting at `offset`
    pub fn get(&self, offset: usize) -> Option<&[u8]> {
        let tail = self.buffer.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        Some(&tail[..end])
    }
}
