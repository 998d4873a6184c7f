//! Append-only producer for `.hyd` files.
//!
//! Entries accumulate in an in-memory block buffer and hit the disk as
//! whole checksummed blocks, either when the payload budget fills or on an
//! explicit flush. Counters advance only on successful block emission, so
//! `stats` always describes durable-candidate state. The close sequence is
//! flush → footer → header rewrite → fsync.
//!
//! Reopening an existing file cuts off the old footer and any torn tail
//! left by a crash, recomputes the counters from the surviving blocks, and
//! resumes appending at the last valid block boundary.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::format::{wall_nanos, Entry, Footer, Header, HEADER_BYTES};
use crate::reader::scan_body;
use crate::HydError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Poisoned,
}

/// Exclusive append handle for one `.hyd` file.
///
/// A `write_entry` returning `Ok` means the entry sits in the block buffer;
/// durability requires [`flush`](FileWriter::flush),
/// [`sync`](FileWriter::sync), or [`close`](FileWriter::close). The first
/// I/O failure poisons the writer and every later call reports it.
pub struct FileWriter {
    file: std::fs::File,
    path: PathBuf,
    max_block_size: usize,
    header: Header,
    /// File offset where the next block frame will be written.
    end_offset: u64,
    /// Offset of the most recently emitted block, 0 when none.
    last_block_offset: u64,
    /// Serialized entries of the block under construction.
    buf: Vec<u8>,
    buf_entries: u32,
    /// Scratch for the assembled frame, written in one `write_all`.
    frame: Vec<u8>,
    state: State,
}

impl FileWriter {
    /// Opens `path` for appending, creating it with a fresh header when it
    /// does not exist.
    ///
    /// An existing file has its header validated and its body scanned: the
    /// old footer and any torn tail are truncated away, counters are
    /// recomputed from the valid blocks, and appending resumes at the last
    /// good block boundary.
    ///
    /// # Errors
    ///
    /// [`HydError::InvalidConfig`] when `max_block_size` is zero, header
    /// validation errors for an existing file, or I/O failure.
    pub fn open<P: AsRef<Path>>(path: P, max_block_size: usize) -> Result<Self, HydError> {
        if max_block_size == 0 {
            return Err(HydError::InvalidConfig("max_block_size must be nonzero"));
        }
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let file_len = file.metadata()?.len();

        let (header, end_offset, last_block_offset) = if file_len == 0 {
            let header = Header::new(wall_nanos());
            file.write_all(&header.encode())?;
            (header, HEADER_BYTES, 0)
        } else {
            if file_len < HEADER_BYTES {
                return Err(HydError::TruncatedHeader);
            }
            let mut buf = [0u8; HEADER_BYTES as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            let mut header = Header::decode(&buf)?;

            let scan = scan_body(&mut file, file_len)?;
            if scan.end_offset < file_len {
                if scan.footer.is_none() {
                    log::warn!(
                        "{}: truncating torn tail at offset {} (file length {})",
                        path.display(),
                        scan.end_offset,
                        file_len
                    );
                }
                file.set_len(scan.end_offset)?;
            }
            // The scan recomputes the counters from the block frames, so a
            // stale header (crash before close) self-heals here.
            header.block_count = scan.block_count;
            header.entry_count = scan.entry_count;
            (header, scan.end_offset, scan.last_block_offset)
        };

        file.seek(SeekFrom::Start(end_offset))?;
        Ok(Self {
            file,
            path,
            max_block_size,
            header,
            end_offset,
            last_block_offset,
            buf: Vec::with_capacity(max_block_size.min(1 << 20)),
            buf_entries: 0,
            frame: Vec::new(),
            state: State::Open,
        })
    }

    /// Appends one entry to the block under construction.
    ///
    /// When adding the entry would push the accumulated payload past
    /// `max_block_size`, the current block is emitted first; a single entry
    /// larger than the budget is permitted and occupies a block of its own.
    ///
    /// # Errors
    ///
    /// [`HydError::Closed`] / [`HydError::Poisoned`] for lifecycle
    /// violations, [`HydError::InvalidEntry`] for constraint violations,
    /// [`HydError::Io`] when a triggered block emission fails.
    pub fn write_entry(&mut self, entry: &Entry) -> Result<(), HydError> {
        self.check_open()?;
        entry.check()?;

        let encoded = entry.encoded_len();
        if !self.buf.is_empty() && self.buf.len() + encoded > self.max_block_size {
            self.emit_block()?;
        }
        entry.encode_into(&mut self.buf);
        self.buf_entries += 1;
        Ok(())
    }

    /// Appends a batch, stopping at the first failing entry.
    ///
    /// Entries are atomic individually (none is ever half-written); the
    /// batch as a whole is not.
    pub fn write_entries(&mut self, entries: &[Entry]) -> Result<(), HydError> {
        for entry in entries {
            self.write_entry(entry)?;
        }
        Ok(())
    }

    /// Forces the current non-empty block to the file. No-op when empty.
    pub fn flush(&mut self) -> Result<(), HydError> {
        self.check_open()?;
        self.emit_block()
    }

    /// [`flush`](FileWriter::flush) plus an fsync of the file.
    pub fn sync(&mut self) -> Result<(), HydError> {
        self.check_open()?;
        self.emit_block()?;
        if let Err(e) = self.file.sync_all() {
            self.state = State::Poisoned;
            return Err(HydError::Io(e));
        }
        Ok(())
    }

    /// Flushes, writes the footer, rewrites the header with final counters,
    /// fsyncs, and releases the handle for good.
    ///
    /// A second close returns [`HydError::Closed`].
    pub fn close(&mut self) -> Result<(), HydError> {
        self.check_open()?;
        self.emit_block()?;

        let footer = Footer {
            last_block_offset: self.last_block_offset,
            block_count: self.header.block_count,
            entry_count: self.header.entry_count,
        };
        self.header.modified_at_nanos = wall_nanos();

        let result = (|| -> std::io::Result<()> {
            self.file.seek(SeekFrom::Start(self.end_offset))?;
            self.file.write_all(&footer.encode())?;
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_all(&self.header.encode())?;
            self.file.sync_all()
        })();
        match result {
            Ok(()) => {
                self.end_offset += crate::format::FOOTER_BYTES;
                self.state = State::Closed;
                Ok(())
            }
            Err(e) => {
                self.state = State::Poisoned;
                Err(HydError::Io(e))
            }
        }
    }

    /// Returns `(block_count, entry_count)` as of the last successful
    /// block emission.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (self.header.block_count, self.header.entry_count)
    }

    /// Returns the path this writer appends to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_open(&self) -> Result<(), HydError> {
        match self.state {
            State::Open => Ok(()),
            State::Closed => Err(HydError::Closed),
            State::Poisoned => Err(HydError::Poisoned),
        }
    }

    /// Frames and writes the buffered block, advancing the counters.
    fn emit_block(&mut self) -> Result<(), HydError> {
        if self.buf.is_empty() {
            return Ok(());
        }

        self.frame.clear();
        self.frame
            .extend_from_slice(&(self.buf.len() as u32).to_le_bytes());
        self.frame.extend_from_slice(&self.buf_entries.to_le_bytes());
        self.frame.extend_from_slice(&self.buf);
        self.frame
            .extend_from_slice(&codec::checksum(&self.buf).to_le_bytes());

        if let Err(e) = self.file.write_all(&self.frame) {
            self.state = State::Poisoned;
            return Err(HydError::Io(e));
        }

        self.last_block_offset = self.end_offset;
        self.end_offset += self.frame.len() as u64;
        self.header.block_count += 1;
        self.header.entry_count += u64::from(self.buf_entries);
        self.buf.clear();
        self.buf_entries = 0;
        Ok(())
    }
}

impl std::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWriter")
            .field("path", &self.path)
            .field("max_block_size", &self.max_block_size)
            .field("block_count", &self.header.block_count)
            .field("entry_count", &self.header.entry_count)
            .field("pending_entries", &self.buf_entries)
            .field("state", &self.state)
            .finish()
    }
}

/// Best-effort close on drop.
///
/// Errors are swallowed because `Drop` cannot propagate them; callers that
/// need the error must call [`close`](FileWriter::close) explicitly.
impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.state == State::Open {
            let _ = self.close();
        }
    }
}
