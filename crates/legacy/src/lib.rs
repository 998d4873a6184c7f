//! # Legacy — V1 swamp-folder parser
//!
//! A V1 swamp is a directory holding a binary `meta` file plus zero or more
//! UUID-named chunk files. Each chunk is a snappy-compressed concatenation
//! of length-prefixed record blobs:
//!
//! ```text
//! chunk (decompressed):  [len: u32 LE][segment] [len: u32 LE][segment] ...
//! segment:               [key_len: u16 LE][key UTF-8][payload ...]
//! meta:                  [field_count: u32] { [name_len: u32][name]
//!                                             [value_len: u32][value] }*
//! ```
//!
//! The parser recovers `(key, segment)` pairs — the segment bytes are kept
//! verbatim so the migrator can store them untouched as V2 entry data — and
//! the swamp name from the meta file's `swamp_name` field. Everything else
//! in the meta envelope is skipped.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use codec::{CodecError, Slice};
use thiserror::Error;

/// Name of the meta file inside a V1 swamp folder.
pub const META_FILE: &str = "meta";

/// Meta envelope field carrying the swamp's name.
pub const SWAMP_NAME_FIELD: &str = "swamp_name";

/// Errors raised while parsing V1 folders.
#[derive(Debug, Error)]
pub enum LegacyError {
    /// Snappy decompression of a chunk file failed.
    #[error("snappy decompression failed: {0}")]
    Decompress(#[from] snap::Error),

    /// The chunk or meta envelope does not follow the expected layout.
    #[error("parse error: {0}")]
    Parse(&'static str),

    /// A segment declared more bytes than the chunk holds.
    #[error("segment length {declared} exceeds remaining {remaining} bytes")]
    Truncated { declared: u32, remaining: usize },

    /// A record segment carries an empty key.
    #[error("record segment carries an empty key")]
    MissingKey,

    /// An underlying filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<CodecError> for LegacyError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnexpectedEof => LegacyError::Parse("unexpected end of input"),
            CodecError::BlobOverrun {
                declared,
                remaining,
            } => LegacyError::Truncated {
                declared,
                remaining,
            },
        }
    }
}

/// Everything loaded from one V1 swamp folder.
#[derive(Debug, Clone, Default)]
pub struct SwampLoad {
    /// Swamp name from `meta`, empty when missing or unreadable.
    pub name: String,
    /// Deduplicated records: last occurrence wins across chunk files in
    /// lexicographic filename order.
    pub entries: BTreeMap<String, Vec<u8>>,
    /// Record segments seen before deduplication.
    pub raw_entries: u64,
    /// Segments displaced by a later occurrence of the same key.
    pub duplicate_keys: u64,
}

/// Returns `true` when `name` looks like a V1 chunk file: nonempty,
/// extension-less, hex digits and dashes only.
#[must_use]
pub fn is_uuid_shaped(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-')
}

/// Detects whether `dir` is a V1 swamp folder: it holds a regular file
/// named `meta`, or at least one UUID-shaped data file.
#[must_use]
pub fn is_swamp_folder(dir: &Path) -> bool {
    let Ok(rd) = fs::read_dir(dir) else {
        return false;
    };
    for entry in rd.flatten() {
        let Ok(ft) = entry.file_type() else { continue };
        if !ft.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == META_FILE || is_uuid_shaped(name) {
            return true;
        }
    }
    false
}

/// Decodes the meta envelope and extracts the `swamp_name` field.
///
/// Unknown fields are skipped. A missing `swamp_name` field yields an empty
/// string (older folders predate the field).
pub fn decode_meta(bytes: &[u8]) -> Result<String, LegacyError> {
    let mut sl = Slice::new(bytes);
    let field_count = sl.read_u32()?;
    // Sanity bound: each field needs at least its two length prefixes.
    if field_count as usize > bytes.len() / 8 + 1 {
        return Err(LegacyError::Parse("implausible meta field count"));
    }
    for _ in 0..field_count {
        let name = sl.read_blob()?;
        let value = sl.read_blob()?;
        if name == SWAMP_NAME_FIELD.as_bytes() {
            return std::str::from_utf8(value)
                .map(str::to_string)
                .map_err(|_| LegacyError::Parse("swamp_name is not UTF-8"));
        }
    }
    Ok(String::new())
}

/// Splits a decompressed chunk into its length-prefixed segments.
///
/// Zero-length segments are skipped. A declared length running past the
/// remaining input is fatal for the chunk.
pub fn split_segments(blob: &[u8]) -> Result<Vec<&[u8]>, LegacyError> {
    let mut sl = Slice::new(blob);
    let mut out = Vec::new();
    while !sl.is_empty() {
        let segment = sl.read_blob()?;
        if segment.is_empty() {
            continue;
        }
        out.push(segment);
    }
    Ok(out)
}

/// Decompresses one chunk file and splits it into `(key, segment)` pairs.
///
/// The returned segment bytes include the key envelope, preserved verbatim
/// for the V2 entry data.
pub fn parse_chunk(raw: &[u8]) -> Result<Vec<(String, Vec<u8>)>, LegacyError> {
    let decompressed = snap::raw::Decoder::new().decompress_vec(raw)?;
    let mut out = Vec::new();
    for segment in split_segments(&decompressed)? {
        let key = segment_key(segment)?;
        out.push((key, segment.to_vec()));
    }
    Ok(out)
}

/// Reads the key out of a record segment's envelope.
pub fn segment_key(segment: &[u8]) -> Result<String, LegacyError> {
    let mut sl = Slice::new(segment);
    let key_len = sl.read_u16()? as usize;
    if key_len == 0 {
        return Err(LegacyError::MissingKey);
    }
    let key_bytes = sl.read_exact(key_len)?;
    std::str::from_utf8(key_bytes)
        .map(str::to_string)
        .map_err(|_| LegacyError::Parse("record key is not UTF-8"))
}

/// Loads a whole V1 swamp folder: meta name plus deduplicated records.
///
/// Chunk files are parsed in lexicographic filename order so that the
/// last-occurrence-wins deduplication is deterministic. A missing or
/// malformed `meta` degrades to an empty name with a warning; a malformed
/// chunk file fails the load.
pub fn load_folder(dir: &Path) -> Result<SwampLoad, LegacyError> {
    let mut load = SwampLoad::default();

    match fs::read(dir.join(META_FILE)) {
        Ok(bytes) => match decode_meta(&bytes) {
            Ok(name) => load.name = name,
            Err(e) => {
                log::warn!("{}: unreadable meta envelope ({}), continuing", dir.display(), e);
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            log::warn!("{}: cannot read meta ({}), continuing", dir.display(), e);
        }
    }

    let mut chunk_names: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_uuid_shaped(name) {
                chunk_names.push(name.to_string());
            }
        }
    }
    chunk_names.sort();

    for name in &chunk_names {
        let raw = fs::read(dir.join(name))?;
        for (key, segment) in parse_chunk(&raw)? {
            load.raw_entries += 1;
            if load.entries.insert(key, segment).is_some() {
                load.duplicate_keys += 1;
            }
        }
    }

    Ok(load)
}
