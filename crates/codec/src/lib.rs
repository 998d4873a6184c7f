//! # Codec — binary primitives
//!
//! Shared low-level building blocks for every on-disk structure in the
//! engine: fixed little-endian scalar I/O, length-prefixed blobs, a bounded
//! slice reader, and the checksum used by all block/header/footer framing.
//!
//! ## Wire conventions
//!
//! ```text
//! scalar:  u16 / u32 / u64, little-endian
//! blob:    [len: u32 LE][bytes ...]
//! ```
//!
//! The checksum is CRC-32 (IEEE polynomial, via `crc32fast`). Writer and
//! reader must agree on it; nothing else in the codebase computes checksums
//! any other way.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use thiserror::Error;

/// Errors produced when decoding from a bounded slice.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remained than the read required.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A blob declared more bytes than remain in the input.
    #[error("blob length {declared} exceeds remaining {remaining} bytes")]
    BlobOverrun { declared: u32, remaining: usize },
}

/// Computes the CRC-32 (IEEE) checksum over `bytes`.
///
/// This is the single checksum function shared by block trailers, file
/// headers, and file footers.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Writes a `u16` in little-endian order.
pub fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_u16::<LittleEndian>(v)
}

/// Writes a `u32` in little-endian order.
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(v)
}

/// Writes a `u64` in little-endian order.
pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(v)
}

/// Writes a length-prefixed blob: `[len: u32 LE][bytes]`.
///
/// # Errors
///
/// Returns `InvalidInput` if `bytes` is longer than `u32::MAX`.
pub fn write_blob<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    if bytes.len() > u32::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "blob exceeds u32::MAX bytes",
        ));
    }
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

/// A bounded, position-tracking reader over a byte slice.
///
/// All reads are checked against the remaining length; running off the end
/// yields [`CodecError::UnexpectedEof`] instead of panicking or reading
/// stale bytes. Returned slices borrow from the underlying input, so
/// decoding is allocation-free until the caller decides to copy.
#[derive(Debug, Clone)]
pub struct Slice<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Slice<'a> {
    /// Wraps `buf` with the cursor at position 0.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns `true` if every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the current cursor position from the start of the slice.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Advances the cursor by `n` bytes without reading them.
    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        if n > self.remaining() {
            return Err(CodecError::UnexpectedEof);
        }
        self.pos += n;
        Ok(())
    }

    /// Reads exactly `n` bytes, returning a subslice of the input.
    pub fn read_exact(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::UnexpectedEof);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_exact(1)?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.read_exact(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.read_exact(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.read_exact(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Reads a length-prefixed blob: `[len: u32 LE][bytes]`.
    ///
    /// A declared length larger than the remaining input is reported as
    /// [`CodecError::BlobOverrun`] so callers can distinguish a corrupt
    /// length field from a plain short read.
    pub fn read_blob(&mut self) -> Result<&'a [u8], CodecError> {
        let declared = self.read_u32()?;
        if declared as usize > self.remaining() {
            return Err(CodecError::BlobOverrun {
                declared,
                remaining: self.remaining(),
            });
        }
        self.read_exact(declared as usize)
    }
}

#[cfg(test)]
mod tests;
