//! Tests for the on-disk format: header checks, object bounds, lifecycle states

use atlaslog::format::{
    decode_object, encode_entry, EntryItem, EntryObject, FileState, Header, ObjectType,
    HEADER_SIZE,
};
use atlaslog::journal::JournalFile;
use atlaslog::{AtlasError, Id128, Timestamps};

use crate::common::{
    create_file, entry_items, file_options, overwrite, setup_temp_dir, test_cache, test_config,
};

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_encode_decode() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let mut file = create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache);
    for i in 0..5 {
        file.append_entry(&entry_items(i), &Timestamps::new(100 + i, i), Id128::NIL)
            .unwrap();
    }

    let header = file.header().clone();
    let encoded = header.encode();
    assert_eq!(encoded.len() as u64, HEADER_SIZE);
    assert_eq!(Header::decode(&encoded).unwrap(), header);
}

#[test]
fn test_new_file_layout() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let file = create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache);

    let header = file.header();
    assert_eq!(header.state, FileState::Online);
    assert_eq!(header.header_size, HEADER_SIZE);
    assert_eq!(header.n_objects, 2);
    assert_eq!(header.n_entries, 0);
    assert_eq!(header.field_hash_table_offset, HEADER_SIZE);
    assert!(header.data_hash_table_offset > header.field_hash_table_offset);
    assert!(file.is_writable());
}

#[test]
fn test_bad_signature_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let path = dir.join("t.journal");
    create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache)
        .close()
        .unwrap();

    overwrite(&path, 0, b"NOTAJRNL");
    let err = JournalFile::open(&path, &cache).err().unwrap();
    assert!(matches!(err, AtlasError::CorruptFile(_)), "{:?}", err);
}

#[test]
fn test_unknown_incompatible_flag_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let path = dir.join("t.journal");
    let file = create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache);
    let flags = file.header().incompatible_flags;
    file.close().unwrap();

    overwrite(&path, 12, &(flags | 1 << 9).to_le_bytes());
    let err = JournalFile::open(&path, &cache).err().unwrap();
    assert!(matches!(err, AtlasError::UnsupportedFeature(_)), "{:?}", err);
}

#[test]
fn test_unknown_compatible_flag_accepted() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let path = dir.join("t.journal");
    let file = create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache);
    let flags = file.header().compatible_flags;
    file.close().unwrap();

    overwrite(&path, 8, &(flags | 1 << 9).to_le_bytes());
    assert!(JournalFile::open(&path, &cache).is_ok());
}

#[test]
fn test_truncated_file_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let path = dir.join("t.journal");
    let mut file = create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache);
    file.append_entry(&entry_items(0), &Timestamps::new(1, 1), Id128::NIL)
        .unwrap();
    let arena_end = file.header().arena_end();
    file.close().unwrap();

    // Arena no longer fits
    let handle = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    handle.set_len(arena_end - 8).unwrap();
    let err = JournalFile::open(&path, &cache).err().unwrap();
    assert!(matches!(err, AtlasError::CorruptFile(_)), "{:?}", err);

    // Not even a header
    handle.set_len(100).unwrap();
    let err = JournalFile::open(&path, &cache).err().unwrap();
    assert!(matches!(err, AtlasError::CorruptFile(_)), "{:?}", err);
}

#[test]
fn test_missing_file_is_not_found() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let path = dir.join("missing.journal");
    let err = JournalFile::open(&path, &cache).err().unwrap();
    match err {
        AtlasError::NotFound(p) => assert_eq!(p, path),
        other => panic!("unexpected error {:?}", other),
    }
}

// =============================================================================
// Object Bounds Tests
// =============================================================================

#[test]
fn test_read_object_bounds() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let mut file = create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache);
    let appended = file
        .append_entry(&entry_items(0), &Timestamps::new(1, 1), Id128::NIL)
        .unwrap();
    let end = file.header().arena_end();

    for offset in [0, 8, HEADER_SIZE + 4, end, end + 64, u64::MAX - 7] {
        let err = file.read_object(offset, None).err().unwrap();
        assert!(
            matches!(err, AtlasError::CorruptObject { .. }),
            "offset {}: {:?}",
            offset,
            err
        );
    }

    // Right offset, wrong type
    let err = file.read_data(appended.offset).err().unwrap();
    assert!(matches!(err, AtlasError::CorruptObject { .. }));
    assert_eq!(
        file.read_object(appended.offset, Some(ObjectType::Entry))
            .unwrap()
            .object_type(),
        ObjectType::Entry
    );
}

#[test]
fn test_corrupt_object_size_detected() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let path = dir.join("t.journal");
    let mut file = create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache);
    let first = file
        .append_entry(&entry_items(0), &Timestamps::new(1, 1), Id128::NIL)
        .unwrap();
    file.append_entry(&entry_items(1), &Timestamps::new(2, 2), Id128::NIL)
        .unwrap();
    file.close().unwrap();

    // Declared size larger than the rest of the arena
    overwrite(&path, first.offset + 8, &u64::MAX.to_le_bytes());
    let file = JournalFile::open(&path, &cache).unwrap();
    let err = file.read_entry(first.offset).err().unwrap();
    assert!(matches!(err, AtlasError::CorruptObject { offset, .. } if offset == first.offset));
}

#[test]
fn test_decode_object_rejects_malformed_bytes() {
    let entry = EntryObject {
        seqnum: 1,
        realtime: 2,
        monotonic: 3,
        boot_id: Id128::NIL,
        xor_hash: 0,
        items: vec![EntryItem {
            object_offset: 1024,
            hash: None,
        }],
    };
    let encoded = encode_entry(&entry, true);
    match decode_object(HEADER_SIZE, &encoded, true).unwrap() {
        atlaslog::format::Object::Entry(decoded) => assert_eq!(decoded, entry),
        other => panic!("unexpected object {:?}", other),
    }

    // Fewer bytes than declared
    let short = &encoded[..encoded.len() - 4];
    assert!(decode_object(HEADER_SIZE, short, true).is_err());

    // Unknown type tag
    let mut bad_type = encoded.to_vec();
    bad_type[0] = 0xFF;
    assert!(decode_object(HEADER_SIZE, &bad_type, true).is_err());

    // Flags are only legal on DATA
    let mut bad_flags = encoded.to_vec();
    bad_flags[1] = 1;
    assert!(decode_object(HEADER_SIZE, &bad_flags, true).is_err());

    // Item referencing offset zero
    let mut zero_item = encoded.to_vec();
    let last = zero_item.len() - 4;
    zero_item[last..].copy_from_slice(&0u32.to_le_bytes());
    assert!(decode_object(HEADER_SIZE, &zero_item, true).is_err());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_close_and_reopen_for_append() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let config = test_config(&dir, "t");
    let path = dir.join("t.journal");
    let mut file = create_file(&dir, "t.journal", &config, &cache);
    file.append_entry(&entry_items(0), &Timestamps::new(1, 1), Id128::NIL)
        .unwrap();
    file.close().unwrap();

    assert_eq!(
        JournalFile::open(&path, &cache).unwrap().header().state,
        FileState::Offline
    );

    let mut file = JournalFile::open_for_append(&path, &file_options(&config), &cache).unwrap();
    assert_eq!(file.header().state, FileState::Online);
    let appended = file
        .append_entry(&entry_items(1), &Timestamps::new(2, 2), Id128::NIL)
        .unwrap();
    assert_eq!(appended.seqnum, 2);
}

#[test]
fn test_unclean_and_archived_files_refuse_append() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let config = test_config(&dir, "t");

    // Never closed: still marked online on disk
    let dirty = create_file(&dir, "dirty.journal", &config, &cache);
    std::mem::forget(dirty);
    let err = JournalFile::open_for_append(&dir.join("dirty.journal"), &file_options(&config), &cache)
        .err()
        .unwrap();
    assert!(matches!(err, AtlasError::CorruptFile(_)), "{:?}", err);
    // The failed attempt must not have touched the state
    assert_eq!(
        JournalFile::open(&dir.join("dirty.journal"), &cache)
            .unwrap()
            .header()
            .state,
        FileState::Online
    );

    let mut archived = create_file(&dir, "archived.journal", &config, &cache);
    archived.archive().unwrap();
    drop(archived);
    let err = JournalFile::open_for_append(&dir.join("archived.journal"), &file_options(&config), &cache)
        .err()
        .unwrap();
    assert!(matches!(err, AtlasError::CorruptFile(_)), "{:?}", err);
}

#[test]
fn test_read_only_file_rejects_append() {
    let (_temp, dir) = setup_temp_dir();
    let cache = test_cache();
    let path = dir.join("t.journal");
    create_file(&dir, "t.journal", &test_config(&dir, "t"), &cache)
        .close()
        .unwrap();

    let mut file = JournalFile::open(&path, &cache).unwrap();
    assert!(!file.is_writable());
    assert!(file
        .append_entry(&entry_items(0), &Timestamps::new(1, 1), Id128::NIL)
        .is_err());
    assert_eq!(file.header().n_entries, 0);
}
