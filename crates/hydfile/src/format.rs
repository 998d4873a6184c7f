//! On-disk layout of the V2 swamp file (`.hyd`).
//!
//! ## Header (64 bytes, offset 0) - magic `HYDR`
//!
//! ```text
//! [magic: 4B "HYDR"][version: u32][created_at: u64][modified_at: u64]
//! [block_count: u64][entry_count: u64][reserved: 20B zero][crc32: u32]
//! ```
//!
//! The CRC covers the first 60 bytes. The header is written once at file
//! creation and rewritten with final counters on every successful close, so
//! its counters may lag the body after a crash.
//!
//! ## Block
//!
//! ```text
//! [payload_len: u32][entry_count: u32][entries ...][crc32: u32]
//! ```
//!
//! The length fields lead the block so the body can be replayed in a single
//! forward pass; the CRC over the entry payload trails it. A block never
//! splits an entry.
//!
//! ## Entry
//!
//! ```text
//! [op: u8][key_len: u16][data_len: u32][key bytes][data bytes]
//! ```
//!
//! ## Footer (32 bytes, appended on close) - magic `HYDF`
//!
//! ```text
//! [magic: u32][last_block_offset: u64][block_count: u64][entry_count: u64][crc32: u32]
//! ```
//!
//! The footer magic, read as a u32 payload length, exceeds
//! [`MAX_BLOCK_PAYLOAD`], so a forward scan distinguishes a footer from a
//! block frame without lookahead. Reopening for append cuts the footer off;
//! the next close writes a fresh one at the new end.

use std::time::{SystemTime, UNIX_EPOCH};

use codec::{CodecError, Slice};

use crate::HydError;

/// Magic bytes at offset 0 of every `.hyd` file.
pub const HYD_MAGIC: [u8; 4] = *b"HYDR";

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_BYTES: u64 = 64;

/// Fixed footer size in bytes.
pub const FOOTER_BYTES: u64 = 32;

/// Footer magic: the bytes `HYDF` read as a little-endian u32.
///
/// Chosen above [`MAX_BLOCK_PAYLOAD`] so the forward scan can tell a footer
/// from a block's length prefix.
pub const FOOTER_MAGIC: u32 = 0x4644_5948;

/// Size of the block prefix: `payload_len: u32` + `entry_count: u32`.
pub const BLOCK_PREFIX_BYTES: u64 = 8;

/// Size of the block trailer: `crc32: u32` over the entry payload.
pub const BLOCK_TRAILER_BYTES: u64 = 4;

/// Upper bound on a block's entry payload (256 MiB). Prevents OOM-sized
/// allocations when a length prefix is corrupt.
pub const MAX_BLOCK_PAYLOAD: u32 = 256 * 1024 * 1024;

/// Default writer block payload budget (64 KiB).
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Maximum key length in bytes (`key_len` is a u16).
pub const MAX_KEY_BYTES: usize = u16::MAX as usize;

/// Per-entry framing overhead: op + key_len + data_len.
pub const ENTRY_OVERHEAD: usize = 1 + 2 + 4;

/// Reserved key carried by Metadata entries.
pub const META_KEY: &str = "__swamp_meta__";

/// Operation carried by a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Install a key's value.
    Insert = 1,
    /// Overwrite a key's value.
    Update = 2,
    /// Remove a key (empty data).
    Delete = 3,
    /// File-level metadata under the reserved key.
    Metadata = 4,
}

impl Operation {
    /// Decodes an op code, `None` for unknown values.
    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Operation::Insert),
            2 => Some(Operation::Update),
            3 => Some(Operation::Delete),
            4 => Some(Operation::Metadata),
            _ => None,
        }
    }

    /// Returns the on-disk op code.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One log record: an operation, a UTF-8 key, and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub op: Operation,
    pub key: String,
    pub data: Vec<u8>,
}

impl Entry {
    /// Builds an Insert entry.
    #[must_use]
    pub fn insert(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Operation::Insert,
            key: key.into(),
            data: data.into(),
        }
    }

    /// Builds an Update entry.
    #[must_use]
    pub fn update(key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Operation::Update,
            key: key.into(),
            data: data.into(),
        }
    }

    /// Builds a Delete entry (tombstone, no payload).
    #[must_use]
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            op: Operation::Delete,
            key: key.into(),
            data: Vec::new(),
        }
    }

    /// Builds a Metadata entry under the reserved key.
    #[must_use]
    pub fn metadata(data: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Operation::Metadata,
            key: META_KEY.to_string(),
            data: data.into(),
        }
    }

    /// Total serialized size of this entry in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        ENTRY_OVERHEAD + self.key.len() + self.data.len()
    }

    /// Validates the structural constraints the writer enforces.
    pub fn check(&self) -> Result<(), HydError> {
        if self.key.is_empty() {
            return Err(HydError::InvalidEntry("empty key"));
        }
        if self.key.len() > MAX_KEY_BYTES {
            return Err(HydError::InvalidEntry("key exceeds 65535 bytes"));
        }
        if self.data.len() > u32::MAX as usize {
            return Err(HydError::InvalidEntry("data exceeds u32::MAX bytes"));
        }
        match self.op {
            Operation::Delete if !self.data.is_empty() => {
                Err(HydError::InvalidEntry("delete carries a payload"))
            }
            Operation::Metadata if self.key != META_KEY => {
                Err(HydError::InvalidEntry("metadata key must be __swamp_meta__"))
            }
            _ => Ok(()),
        }
    }

    /// Serializes the entry onto `buf`.
    ///
    /// The caller is responsible for having run [`check`](Entry::check).
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.op.as_u8());
        buf.extend_from_slice(&(self.key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());
        buf.extend_from_slice(&self.data);
    }
}

/// Entry decode failure, mapped to `CorruptBlock` by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryError {
    Truncated,
    BadOp(u8),
    BadKey,
}

impl From<CodecError> for EntryError {
    fn from(_: CodecError) -> Self {
        EntryError::Truncated
    }
}

/// Decodes one entry from `sl`, advancing the cursor past it.
pub(crate) fn decode_entry(sl: &mut Slice<'_>) -> Result<Entry, EntryError> {
    let op_byte = sl.read_u8()?;
    let op = Operation::from_u8(op_byte).ok_or(EntryError::BadOp(op_byte))?;
    let key_len = sl.read_u16()? as usize;
    let data_len = sl.read_u32()? as usize;
    let key_bytes = sl.read_exact(key_len)?;
    let data = sl.read_exact(data_len)?;
    let key = std::str::from_utf8(key_bytes)
        .map_err(|_| EntryError::BadKey)?
        .to_string();
    Ok(Entry {
        op,
        key,
        data: data.to_vec(),
    })
}

/// Parsed file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub created_at_nanos: u64,
    pub modified_at_nanos: u64,
    pub block_count: u64,
    pub entry_count: u64,
}

impl Header {
    /// Fresh header for a newly created file.
    #[must_use]
    pub(crate) fn new(now_nanos: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            created_at_nanos: now_nanos,
            modified_at_nanos: now_nanos,
            block_count: 0,
            entry_count: 0,
        }
    }

    /// Serializes the header into its fixed 64-byte form.
    #[must_use]
    pub(crate) fn encode(&self) -> [u8; HEADER_BYTES as usize] {
        let mut buf = [0u8; HEADER_BYTES as usize];
        buf[0..4].copy_from_slice(&HYD_MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.created_at_nanos.to_le_bytes());
        buf[16..24].copy_from_slice(&self.modified_at_nanos.to_le_bytes());
        buf[24..32].copy_from_slice(&self.block_count.to_le_bytes());
        buf[32..40].copy_from_slice(&self.entry_count.to_le_bytes());
        // bytes 40..60 reserved, zero
        let crc = codec::checksum(&buf[0..60]);
        buf[60..64].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses and validates a 64-byte header.
    pub(crate) fn decode(buf: &[u8; HEADER_BYTES as usize]) -> Result<Self, HydError> {
        if buf[0..4] != HYD_MAGIC {
            return Err(HydError::BadMagic);
        }
        let stored_crc = u32_at(buf, 60);
        if codec::checksum(&buf[0..60]) != stored_crc {
            return Err(HydError::CorruptHeader);
        }
        let version = u32_at(buf, 4);
        if version != FORMAT_VERSION {
            return Err(HydError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            created_at_nanos: u64_at(buf, 8),
            modified_at_nanos: u64_at(buf, 16),
            block_count: u64_at(buf, 24),
            entry_count: u64_at(buf, 32),
        })
    }
}

/// Parsed end-of-stream footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// File offset of the final block's first byte, 0 when the body is empty.
    pub last_block_offset: u64,
    pub block_count: u64,
    pub entry_count: u64,
}

impl Footer {
    /// Serializes the footer into its fixed 32-byte form.
    #[must_use]
    pub(crate) fn encode(&self) -> [u8; FOOTER_BYTES as usize] {
        let mut buf = [0u8; FOOTER_BYTES as usize];
        buf[0..4].copy_from_slice(&FOOTER_MAGIC.to_le_bytes());
        buf[4..12].copy_from_slice(&self.last_block_offset.to_le_bytes());
        buf[12..20].copy_from_slice(&self.block_count.to_le_bytes());
        buf[20..28].copy_from_slice(&self.entry_count.to_le_bytes());
        let crc = codec::checksum(&buf[0..28]);
        buf[28..32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses a 32-byte footer, `None` on magic or checksum mismatch.
    #[must_use]
    pub(crate) fn decode(buf: &[u8; FOOTER_BYTES as usize]) -> Option<Self> {
        if u32_at(buf, 0) != FOOTER_MAGIC {
            return None;
        }
        if codec::checksum(&buf[0..28]) != u32_at(buf, 28) {
            return None;
        }
        Some(Self {
            last_block_offset: u64_at(buf, 4),
            block_count: u64_at(buf, 12),
            entry_count: u64_at(buf, 20),
        })
    }
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

/// Wall-clock nanoseconds since the Unix epoch.
pub(crate) fn wall_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
