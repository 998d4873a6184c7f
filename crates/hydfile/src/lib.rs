//! # Hydfile — the V2 swamp file
//!
//! A swamp's entire state in a single append-only file with a fixed header,
//! checksummed entry blocks, and a footer written on close.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ HEADER (64B)  magic HYDR, counters         │
//! ├────────────────────────────────────────────┤
//! │ BLOCK  [payload_len][entry_count]          │
//! │        entry | entry | ...        [crc32]  │
//! ├────────────────────────────────────────────┤
//! │ BLOCK  ...                                 │
//! ├────────────────────────────────────────────┤
//! │ FOOTER (32B)  magic HYDF, last block, crc  │
//! └────────────────────────────────────────────┘
//! ```
//!
//! | Module | Purpose |
//! |---|---|
//! | [`format`] | layout constants, `Entry`/`Header`/`Footer` codecs |
//! | [`writer`] | [`FileWriter`]: append, flush, crash-tail recovery, close |
//! | [`reader`] | [`FileReader`]: index build, streaming replay, fragmentation |
//! | [`compactor`] | [`Compactor`]: threshold-gated rewrite + atomic swap |
//!
//! One writer owns a file at a time; readers never alias a live writer.
//! `write_entry` returning `Ok` does not imply durability — only `flush`,
//! `sync`, and `close` do.

pub mod compactor;
pub mod format;
pub mod reader;
pub mod writer;

pub use compactor::{CompactionResult, Compactor};
pub use format::{Entry, Footer, Header, Operation, DEFAULT_MAX_BLOCK_SIZE, META_KEY};
pub use reader::FileReader;
pub use writer::FileWriter;

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

/// Errors produced by the V2 storage primitives.
#[derive(Debug, Error)]
pub enum HydError {
    /// The file does not start with the `HYDR` magic.
    #[error("bad magic (not a .hyd file)")]
    BadMagic,

    /// The header declares a format version this build cannot read.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    /// The file is shorter than a full header.
    #[error("truncated header")]
    TruncatedHeader,

    /// The header checksum does not match its contents.
    #[error("header checksum mismatch")]
    CorruptHeader,

    /// A block failed checksum or entry validation; the reader truncates
    /// its logical view at the previous block boundary.
    #[error("corrupt block at offset {offset}")]
    CorruptBlock { offset: u64 },

    /// Operation on a writer that was already closed.
    #[error("file is closed")]
    Closed,

    /// Operation on a writer poisoned by an earlier I/O failure.
    #[error("writer failed on an earlier I/O error")]
    Poisoned,

    /// The entry violates an operation/key/length constraint.
    #[error("invalid entry: {0}")]
    InvalidEntry(&'static str),

    /// A constructor argument was out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// An underlying filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Removes a `.hyd` file and prunes its parent hash directory when that
/// leaves the directory empty.
///
/// The surrounding engine calls this when a swamp is destroyed or when the
/// last live key is deleted. Directory pruning is best-effort: a non-empty
/// or concurrently repopulated parent is simply left in place.
pub fn remove_file<P: AsRef<Path>>(path: P) -> Result<(), HydError> {
    let path = path.as_ref();
    fs::remove_file(path)?;
    if let Some(parent) = path.parent() {
        if let Ok(mut rd) = fs::read_dir(parent) {
            if rd.next().is_none() {
                let _ = fs::remove_dir(parent);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
