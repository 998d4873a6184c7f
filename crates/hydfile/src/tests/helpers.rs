use crate::{Entry, FileWriter};
use std::path::Path;

pub fn ins(key: &str, data: &[u8]) -> Entry {
    Entry::insert(key, data.to_vec())
}

pub fn upd(key: &str, data: &[u8]) -> Entry {
    Entry::update(key, data.to_vec())
}

pub fn del(key: &str) -> Entry {
    Entry::delete(key)
}

/// Writes `entries` to a fresh file and closes it cleanly.
pub fn write_file(path: &Path, max_block_size: usize, entries: &[Entry]) {
    let mut w = FileWriter::open(path, max_block_size).unwrap();
    w.write_entries(entries).unwrap();
    w.close().unwrap();
}
