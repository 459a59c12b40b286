//! Reader tests
//!
//! These tests verify:
//! - Merged entries come out in (realtime, seqnum) order across files
//! - Corrupt, unsupported and denied files are skipped and reported while the
//!   rest of the query continues, including headers with impossible sizes
//!   and counters
//! - Tie-break between files with identical keys
//! - Entries committed after the reader opened become visible
//! - Seeking by realtime and seqnum

#[path = "../common/mod.rs"]
mod common;

use std::path::Path;

use atlaslog::access::OwnerAllowList;
use atlaslog::format::Header;
use atlaslog::journal::JournalFile;
use atlaslog::{
    Config, ErrorCategory, JournalEntry, JournalReader, JournalWriter, ReaderOptions, SyncStrategy,
    TieBreak, Timestamps, WriteReceipt,
};
use proptest::prelude::*;

use common::{entry_items, overwrite, setup_temp_dir, test_cache, test_config};

// =============================================================================
// Helper Functions
// =============================================================================

/// Write `realtimes.len()` entries to `stream`, closing the writer
fn write_stream(dir: &Path, stream: &str, realtimes: &[u64]) -> Vec<WriteReceipt> {
    let mut writer = JournalWriter::open(test_config(dir, stream), test_cache()).unwrap();
    let receipts = realtimes
        .iter()
        .enumerate()
        .map(|(i, realtime)| {
            writer
                .write(&entry_items(i as u64), &Timestamps::new(*realtime, i as u64))
                .unwrap()
        })
        .collect();
    writer.close().unwrap();
    receipts
}

fn every(start: u64, step: u64, count: u64) -> Vec<u64> {
    (0..count).map(|i| start + i * step).collect()
}

fn read_dir_entries(dir: &Path) -> (Vec<JournalEntry>, atlaslog::QueryReport) {
    let mut reader = JournalReader::open_directory(dir, &ReaderOptions::new(test_cache()));
    let entries: Vec<JournalEntry> = reader.by_ref().collect();
    (entries, reader.into_report())
}

fn assert_ordered(entries: &[JournalEntry]) {
    for pair in entries.windows(2) {
        assert!(
            (pair[0].realtime, pair[0].seqnum) <= (pair[1].realtime, pair[1].seqnum),
            "{:?} before {:?}",
            (pair[0].realtime, pair[0].seqnum),
            (pair[1].realtime, pair[1].seqnum)
        );
    }
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_interleaves_streams() {
    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "a", &every(10, 30, 10));
    write_stream(&dir, "b", &every(20, 30, 10));
    write_stream(&dir, "c", &every(30, 30, 10));

    let (entries, report) = read_dir_entries(&dir);
    assert!(report.is_clean());
    assert_eq!(entries.len(), 30);
    assert_ordered(&entries);
    let realtimes: Vec<u64> = entries.iter().map(|e| e.realtime).collect();
    assert_eq!(realtimes, every(10, 10, 30));

    let first = &entries[0];
    assert_eq!(first.source, dir.join("a.journal"));
    assert_eq!(first.message().as_deref(), Some("entry 0"));
    assert_eq!(first.field("SYSLOG_IDENTIFIER"), Some(&b"atlaslog-test"[..]));
}

#[test]
fn test_mixed_encodings_merge() {
    let (_temp, dir) = setup_temp_dir();
    for (stream, compact) in [("compact", true), ("legacy", false)] {
        let config = Config::builder()
            .data_dir(&dir)
            .stream(stream)
            .compact(compact)
            .sync_strategy(SyncStrategy::Never)
            .max_file_size(4 * 1024 * 1024)
            .build();
        let mut writer = JournalWriter::open(config, test_cache()).unwrap();
        for i in 0..5u64 {
            writer
                .write(&entry_items(i), &Timestamps::new(100 + i, i))
                .unwrap();
        }
        writer.close().unwrap();
    }

    let (entries, report) = read_dir_entries(&dir);
    assert!(report.is_clean());
    assert_eq!(entries.len(), 10);
    assert_ordered(&entries);
}

#[test]
fn test_empty_and_missing_directories() {
    let (_temp, dir) = setup_temp_dir();
    let (entries, report) = read_dir_entries(&dir);
    assert!(entries.is_empty());
    assert!(report.is_clean());

    let missing = dir.join("missing");
    let reader = JournalReader::open_directory(&missing, &ReaderOptions::new(test_cache()));
    assert!(reader.files().is_empty());
    assert_eq!(
        reader.report().skipped_with(ErrorCategory::NotFound).collect::<Vec<_>>(),
        vec![missing.as_path()]
    );
}

#[test]
fn test_open_files_subset() {
    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "a", &every(10, 10, 5));
    write_stream(&dir, "b", &every(15, 10, 5));

    let reader = JournalReader::open_files(&[dir.join("b.journal")], &ReaderOptions::new(test_cache()));
    assert_eq!(reader.files(), vec![dir.join("b.journal").as_path()]);
    assert_eq!(reader.count(), 5);
}

// =============================================================================
// Fault Isolation Tests
// =============================================================================

#[test]
fn test_corrupt_header_skipped() {
    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "a", &every(10, 10, 10));
    write_stream(&dir, "b", &every(15, 10, 10));
    write_stream(&dir, "c", &every(17, 10, 10));
    overwrite(&dir.join("b.journal"), 0, b"XXXXXXXX");

    let (entries, report) = read_dir_entries(&dir);
    assert_eq!(entries.len(), 20);
    assert_ordered(&entries);
    assert!(entries.iter().all(|e| e.source != dir.join("b.journal")));

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[&dir.join("b.journal")].category, ErrorCategory::Corrupt);
    assert_eq!(report.summary().len(), 1);
}

#[test]
fn test_corrupt_entry_mid_file_stops_only_that_file() {
    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "a", &every(10, 10, 10));
    let receipts = write_stream(&dir, "b", &every(15, 10, 10));
    write_stream(&dir, "c", &every(17, 10, 10));

    // Object type byte of b's fifth entry
    overwrite(&dir.join("b.journal"), receipts[4].offset, &[0xFF]);

    let (entries, report) = read_dir_entries(&dir);
    let from_b = entries
        .iter()
        .filter(|e| e.source == dir.join("b.journal"))
        .count();
    assert_eq!(from_b, 4);
    assert_eq!(entries.len(), 24);
    assert_ordered(&entries);
    assert_eq!(
        report.skipped_with(ErrorCategory::Corrupt).collect::<Vec<_>>(),
        vec![dir.join("b.journal").as_path()]
    );
}

#[test]
fn test_unsupported_file_skipped() {
    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "a", &every(10, 10, 10));
    write_stream(&dir, "b", &every(15, 10, 10));

    let cache = test_cache();
    let flags = JournalFile::open(&dir.join("b.journal"), &cache)
        .unwrap()
        .header()
        .incompatible_flags;
    overwrite(&dir.join("b.journal"), 12, &(flags | 1 << 12).to_le_bytes());

    let (entries, report) = read_dir_entries(&dir);
    assert_eq!(entries.len(), 10);
    assert_eq!(
        report.skipped[&dir.join("b.journal")].category,
        ErrorCategory::Unsupported
    );
    assert_eq!(report.records().len(), 1);
}

#[test]
fn test_corrupt_header_sizes_and_counters_skipped() {
    let tampers: [fn(&mut Header); 4] = [
        |h| h.data_hash_table_size = 0xFFFF_FFFF_FFFF_FFF8,
        |h| h.field_hash_table_size = u64::MAX - 7,
        |h| h.n_entries = u64::MAX / 4,
        |h| h.n_objects = u64::MAX,
    ];
    for tamper in tampers {
        let (_temp, dir) = setup_temp_dir();
        write_stream(&dir, "a", &every(10, 10, 10));
        write_stream(&dir, "b", &every(15, 10, 10));

        let path = dir.join("b.journal");
        let mut header = JournalFile::open(&path, &test_cache())
            .unwrap()
            .header()
            .clone();
        tamper(&mut header);
        overwrite(&path, 0, &header.encode());

        let (entries, report) = read_dir_entries(&dir);
        assert_eq!(entries.len(), 10);
        assert!(entries.iter().all(|e| e.source == dir.join("a.journal")));
        assert_eq!(report.skipped[&path].category, ErrorCategory::Corrupt);
    }
}

#[test]
fn test_denied_file_reported_separately() {
    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "a", &every(10, 10, 10));
    write_stream(&dir, "secret", &every(15, 10, 10));

    let options = ReaderOptions::new(test_cache())
        .access(|path: &Path| !path.to_string_lossy().contains("secret"));
    let mut reader = JournalReader::open_directory(&dir, &options);
    assert_eq!(reader.by_ref().count(), 10);

    let report = reader.into_report();
    assert!(report.skipped.is_empty());
    assert_eq!(
        report.permission_denied.iter().collect::<Vec<_>>(),
        vec![&dir.join("secret.journal")]
    );
}

#[test]
fn test_owner_allow_list() {
    use std::os::unix::fs::MetadataExt;

    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "a", &every(10, 10, 3));
    write_stream(&dir, "b", &every(15, 10, 3));
    let uid = std::fs::metadata(dir.join("a.journal")).unwrap().uid();

    let options = ReaderOptions::new(test_cache()).access(OwnerAllowList::new([uid]));
    assert_eq!(JournalReader::open_directory(&dir, &options).count(), 6);

    let options =
        ReaderOptions::new(test_cache()).access(OwnerAllowList::new([uid.wrapping_add(1)]));
    let mut reader = JournalReader::open_directory(&dir, &options);
    assert_eq!(reader.by_ref().count(), 0);
    assert_eq!(reader.into_report().permission_denied.len(), 2);
}

// =============================================================================
// Tie-Break Tests
// =============================================================================

#[test]
fn test_tie_break_between_files() {
    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "older", &[1_000]);
    std::thread::sleep(std::time::Duration::from_millis(5));
    write_stream(&dir, "newer", &[1_000]);

    let sources = |tie_break| -> Vec<std::path::PathBuf> {
        let options = ReaderOptions::new(test_cache()).tie_break(tie_break);
        JournalReader::open_directory(&dir, &options)
            .map(|e| e.source)
            .collect()
    };

    assert_eq!(
        sources(TieBreak::NewestFirst),
        vec![dir.join("newer.journal"), dir.join("older.journal")]
    );
    assert_eq!(
        sources(TieBreak::OldestFirst),
        vec![dir.join("older.journal"), dir.join("newer.journal")]
    );
}

// =============================================================================
// Live Reading and Seeking
// =============================================================================

#[test]
fn test_entries_written_after_open_become_visible() {
    let (_temp, dir) = setup_temp_dir();
    let mut writer = JournalWriter::open(test_config(&dir, "t"), test_cache()).unwrap();
    common::write_entries(&mut writer, 5, 100, 10);

    let mut reader = JournalReader::open_directory(&dir, &ReaderOptions::new(test_cache()));
    assert_eq!(reader.by_ref().count(), 5);

    for i in 5..8u64 {
        writer
            .write(&entry_items(i), &Timestamps::new(1_000 + i, i))
            .unwrap();
    }
    let seqnums: Vec<u64> = reader.by_ref().map(|e| e.seqnum).collect();
    assert_eq!(seqnums, vec![6, 7, 8]);
    assert!(reader.report().is_clean());
}

#[test]
fn test_seek_realtime_and_seqnum() {
    let (_temp, dir) = setup_temp_dir();
    write_stream(&dir, "t", &every(10, 10, 10));

    let mut reader = JournalReader::open_directory(&dir, &ReaderOptions::new(test_cache()));
    reader.seek_realtime(55);
    assert_eq!(reader.next().map(|e| e.realtime), Some(60));

    reader.seek_seqnum(9);
    let rest: Vec<u64> = reader.by_ref().map(|e| e.seqnum).collect();
    assert_eq!(rest, vec![9, 10]);

    reader.seek_realtime(1_000);
    assert!(reader.next().is_none());

    reader.seek_head();
    assert_eq!(reader.count(), 10);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_merge_is_ordered(
        gaps in proptest::collection::vec(
            proptest::collection::vec(0u64..5, 0..20),
            1..4,
        )
    ) {
        let (_temp, dir) = setup_temp_dir();
        let mut expected = 0;
        for (s, gaps) in gaps.iter().enumerate() {
            let mut realtime = 1_000;
            let realtimes: Vec<u64> = gaps
                .iter()
                .map(|gap| {
                    realtime += gap;
                    realtime
                })
                .collect();
            expected += realtimes.len();
            write_stream(&dir, &format!("s{}", s), &realtimes);
        }

        let (entries, report) = read_dir_entries(&dir);
        prop_assert!(report.is_clean());
        prop_assert_eq!(entries.len(), expected);
        for pair in entries.windows(2) {
            prop_assert!(
                (pair[0].realtime, pair[0].seqnum) <= (pair[1].realtime, pair[1].seqnum)
            );
        }
    }
}
