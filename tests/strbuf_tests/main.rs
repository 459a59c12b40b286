//! Tests for the suffix-sharing string table builder
//!
//! These tests verify:
//! - Offsets returned for new, repeated and suffix strings
//! - Insertion statistics
//! - Every returned offset reads back the string that was added

use atlaslog::strbuf::{StringTable, SuffixBuffer, SuffixStats};
use proptest::prelude::*;

fn read_at(buffer: &[u8], offset: usize) -> &[u8] {
    let tail = &buffer[offset..];
    let end = tail.iter().position(|&b| b == 0).unwrap();
    &tail[..end]
}

// =============================================================================
// Offset Tests
// =============================================================================

#[test]
fn test_suffixes_share_bytes() {
    let mut buffer = SuffixBuffer::new();

    assert_eq!(buffer.add(b"waldo"), 1);
    assert_eq!(buffer.add(b"foo"), 7);
    assert_eq!(buffer.add(b"bar"), 11);
    assert_eq!(buffer.add(b"waldo"), 1);
    assert_eq!(buffer.add(b"aldo"), 2);
    assert_eq!(buffer.add(b"do"), 4);
    assert_eq!(buffer.add(b"waldorf"), 15);
    assert_eq!(buffer.add(b""), 0);

    assert_eq!(buffer.len(), 23);
    assert_eq!(buffer.as_bytes(), b"\0waldo\0foo\0bar\0waldorf\0");
    assert_eq!(
        buffer.stats(),
        SuffixStats {
            nodes: 5,
            in_count: 8,
            in_len: 29,
            dedup_count: 4,
            dedup_len: 11,
        }
    );
}

#[test]
fn test_longer_string_after_suffix_is_stored_again() {
    let mut buffer = SuffixBuffer::new();
    let short = buffer.add(b"do");
    let long = buffer.add(b"waldo");

    assert_eq!(short, 1);
    assert_eq!(long, 4);
    assert_eq!(read_at(buffer.as_bytes(), short), b"do");
    assert_eq!(read_at(buffer.as_bytes(), long), b"waldo");
    assert_eq!(buffer.stats().dedup_count, 0);
}

#[test]
fn test_shared_tail_but_different_prefix() {
    let mut buffer = SuffixBuffer::new();
    assert_eq!(buffer.add(b"_PID"), 1);
    // Same last byte, not a suffix
    assert_eq!(buffer.add(b"_UID"), 6);
    assert_eq!(buffer.add(b"ID"), 3);
    assert_eq!(buffer.add(b"D"), 4);
    assert_eq!(buffer.stats().dedup_count, 2);
}

#[test]
fn test_complete_keeps_buffer() {
    let mut buffer = SuffixBuffer::new();
    buffer.add(b"MESSAGE");
    buffer.add(b"SAGE");
    assert!(!buffer.is_empty());
    assert_eq!(buffer.complete(), b"\0MESSAGE\0".to_vec());
}

// =============================================================================
// String Table Tests
// =============================================================================

#[test]
fn test_table_order_maximizes_sharing() {
    // Added short-first, a raw buffer would store "do" twice
    let table = StringTable::build(["do", "aldo", "waldo"]);
    assert_eq!(table.buffer, b"\0waldo\0");
    assert_eq!(
        table.offsets,
        vec![
            (b"aldo".to_vec(), 2),
            (b"do".to_vec(), 4),
            (b"waldo".to_vec(), 1),
        ]
    );
}

#[test]
fn test_table_get_out_of_range() {
    let table = StringTable::build(["A"]);
    assert_eq!(table.get(0), Some(&b""[..]));
    assert_eq!(table.get(1), Some(&b"A"[..]));
    assert_eq!(table.get(3), None);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_offsets_read_back(strings in proptest::collection::vec("[a-z]{0,8}", 0..64)) {
        let mut buffer = SuffixBuffer::new();
        let offsets: Vec<usize> = strings.iter().map(|s| buffer.add(s.as_bytes())).collect();

        let bytes = buffer.as_bytes();
        for (s, offset) in strings.iter().zip(&offsets) {
            prop_assert_eq!(read_at(bytes, *offset), s.as_bytes());
        }

        let stored: usize = strings.iter().map(|s| s.len() + 1).sum();
        prop_assert!(buffer.len() <= 1 + stored);
        let stats = buffer.stats();
        prop_assert_eq!(stats.in_count, strings.len());
        prop_assert_eq!(
            buffer.len(),
            1 + stats.in_len - stats.dedup_len + (stats.in_count - stats.dedup_count)
        );
    }
}
