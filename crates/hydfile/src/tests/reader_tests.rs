use super::helpers::*;
use crate::{Entry, FileReader, FileWriter, HydError};
use std::fs;
use tempfile::tempdir;

// -------------------- Index state machine --------------------

#[test]
fn index_applies_insert_update_delete_rules() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sm.hyd");

    write_file(
        &path,
        4096,
        &[
            ins("a", b"1"),
            ins("b", b"2"),
            del("a"),
            upd("b", b"2'"),
            ins("c", b"3"),
        ],
    );

    let mut r = FileReader::open(&path).unwrap();
    let (index, _) = r.load_index().unwrap();
    assert_eq!(
        index.keys().cloned().collect::<Vec<_>>(),
        vec!["b".to_string(), "c".to_string()]
    );

    assert_eq!(r.entry_at(index["b"]).unwrap(), upd("b", b"2'"));
    assert_eq!(r.entry_at(index["c"]).unwrap(), ins("c", b"3"));
}

#[test]
fn reinsert_after_delete_revives_key() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rev.hyd");

    write_file(&path, 4096, &[ins("k", b"old"), del("k"), ins("k", b"new")]);

    let mut r = FileReader::open(&path).unwrap();
    let (index, _) = r.load_index().unwrap();
    assert_eq!(r.entry_at(index["k"]).unwrap(), ins("k", b"new"));
}

// -------------------- Metadata --------------------

#[test]
fn metadata_yields_swamp_name_without_polluting_index() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("meta.hyd");

    write_file(
        &path,
        4096,
        &[Entry::metadata(b"users/profiles".to_vec()), ins("k", b"v")],
    );

    let mut r = FileReader::open(&path).unwrap();
    let (index, name) = r.load_index().unwrap();
    assert_eq!(name.as_deref(), Some("users/profiles"));
    assert_eq!(index.len(), 1);
    assert!(!index.contains_key(crate::META_KEY));
}

#[test]
fn newest_metadata_entry_wins() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("meta2.hyd");

    write_file(
        &path,
        4096,
        &[
            Entry::metadata(b"old-name".to_vec()),
            Entry::metadata(b"new-name".to_vec()),
        ],
    );

    let mut r = FileReader::open(&path).unwrap();
    let (_, name) = r.load_index().unwrap();
    assert_eq!(name.as_deref(), Some("new-name"));
}

// -------------------- Streaming --------------------

#[test]
fn read_all_entries_streams_dead_entries_too() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("all.hyd");

    write_file(&path, 32, &[ins("k", b"1"), upd("k", b"2"), del("k")]);

    let mut r = FileReader::open(&path).unwrap();
    let mut ops = Vec::new();
    let n = r
        .read_all_entries(|e, _| {
            ops.push(e.op);
            true
        })
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(
        ops,
        vec![
            crate::Operation::Insert,
            crate::Operation::Update,
            crate::Operation::Delete
        ]
    );
}

#[test]
fn callback_can_stop_the_stream() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stop.hyd");

    write_file(&path, 4096, &[ins("a", b"1"), ins("b", b"2"), ins("c", b"3")]);

    let mut r = FileReader::open(&path).unwrap();
    let mut seen = 0;
    let n = r
        .read_all_entries(|_, _| {
            seen += 1;
            seen < 2
        })
        .unwrap();
    assert_eq!(n, 2);
}

#[test]
fn offsets_reported_by_stream_are_readable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("off.hyd");

    write_file(&path, 16, &[ins("k1", b"v1"), ins("k2", b"v2")]);

    let mut r = FileReader::open(&path).unwrap();
    let mut pairs: Vec<(Entry, u64)> = Vec::new();
    r.read_all_entries(|e, off| {
        pairs.push((e.clone(), off));
        true
    })
    .unwrap();

    for (entry, off) in pairs {
        assert_eq!(r.entry_at(off).unwrap(), entry);
    }
}

// -------------------- Fragmentation edges --------------------

#[test]
fn header_only_file_has_zero_fragmentation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.hyd");

    let mut w = FileWriter::open(&path, 4096).unwrap();
    w.close().unwrap();

    let mut r = FileReader::open(&path).unwrap();
    let (index, name) = r.load_index().unwrap();
    assert!(index.is_empty());
    assert_eq!(name, None);
    assert_eq!(r.fragmentation().unwrap(), (0.0, 0, 0));
}

#[test]
fn only_deletes_is_fully_fragmented() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dels.hyd");

    write_file(&path, 4096, &[del("gone1"), del("gone2")]);

    let mut r = FileReader::open(&path).unwrap();
    let (index, _) = r.load_index().unwrap();
    assert!(index.is_empty());

    let (ratio, live, total) = r.fragmentation().unwrap();
    assert_eq!((live, total), (0, 2));
    assert!((ratio - 1.0).abs() < f64::EPSILON);
}

#[test]
fn metadata_counts_as_live() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mfrag.hyd");

    write_file(
        &path,
        4096,
        &[Entry::metadata(b"name".to_vec()), ins("k", b"v")],
    );

    let mut r = FileReader::open(&path).unwrap();
    let (ratio, live, total) = r.fragmentation().unwrap();
    assert_eq!((live, total), (2, 2));
    assert!(ratio.abs() < f64::EPSILON);
}

// -------------------- Open validation --------------------

#[test]
fn open_rejects_foreign_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("foreign.bin");
    fs::write(&path, vec![b'X'; 128]).unwrap();

    assert!(matches!(FileReader::open(&path), Err(HydError::BadMagic)));
}

#[test]
fn open_rejects_short_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.bin");
    fs::write(&path, b"HYDR").unwrap();

    assert!(matches!(
        FileReader::open(&path),
        Err(HydError::TruncatedHeader)
    ));
}

#[test]
fn open_rejects_corrupt_header_checksum() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("badcrc.hyd");

    write_file(&path, 4096, &[ins("k", b"v")]);
    let mut bytes = fs::read(&path).unwrap();
    bytes[30] ^= 0xFF; // inside the block_count field
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        FileReader::open(&path),
        Err(HydError::CorruptHeader)
    ));
}

#[test]
fn open_rejects_unsupported_version() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vers.hyd");

    write_file(&path, 4096, &[ins("k", b"v")]);
    let mut bytes = fs::read(&path).unwrap();
    // Bump the version field and refresh the header checksum so only the
    // version check can fail.
    bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
    let crc = codec::checksum(&bytes[0..60]);
    bytes[60..64].copy_from_slice(&crc.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        FileReader::open(&path),
        Err(HydError::UnsupportedVersion(7))
    ));
}

// -------------------- remove_file --------------------

#[test]
fn remove_file_prunes_empty_parent() {
    let dir = tempdir().unwrap();
    let hash_dir = dir.path().join("ab");
    fs::create_dir_all(&hash_dir).unwrap();
    let path = hash_dir.join("swamp.hyd");
    write_file(&path, 4096, &[ins("k", b"v")]);

    crate::remove_file(&path).unwrap();
    assert!(!path.exists());
    assert!(!hash_dir.exists(), "empty hash directory is pruned");
    assert!(dir.path().exists());
}

#[test]
fn remove_file_keeps_populated_parent() {
    let dir = tempdir().unwrap();
    let hash_dir = dir.path().join("cd");
    fs::create_dir_all(&hash_dir).unwrap();
    let path = hash_dir.join("one.hyd");
    let other = hash_dir.join("two.hyd");
    write_file(&path, 4096, &[ins("k", b"v")]);
    write_file(&other, 4096, &[ins("k", b"v")]);

    crate::remove_file(&path).unwrap();
    assert!(!path.exists());
    assert!(hash_dir.exists());
    assert!(other.exists());
}
