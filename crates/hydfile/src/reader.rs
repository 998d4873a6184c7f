//! Streaming consumer for `.hyd` files.
//!
//! The reader validates the header on open, then replays the body in a
//! single forward pass: blocks are checksum-verified before any entry in
//! them is surfaced, and a corrupt or torn tail truncates the logical view
//! at the last valid block boundary (logged, never an error). This mirrors
//! the writer's crash contract: everything up to the last fully-written
//! block is trustworthy, nothing after it is.

use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use codec::Slice;

use crate::format::{
    decode_entry, Entry, Footer, Header, Operation, BLOCK_PREFIX_BYTES, BLOCK_TRAILER_BYTES,
    FOOTER_BYTES, FOOTER_MAGIC, HEADER_BYTES, MAX_BLOCK_PAYLOAD,
};
use crate::HydError;

/// Result of scanning a file body for its last valid block boundary.
///
/// Counters are recomputed from the block frames themselves, so they are
/// authoritative even when the header is stale after a crash.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BodyScan {
    /// End of the valid body: first byte past the last good block.
    pub end_offset: u64,
    /// Offset of the last good block's first byte, 0 when none.
    pub last_block_offset: u64,
    pub block_count: u64,
    pub entry_count: u64,
    /// Present when the body is terminated by an intact footer.
    pub footer: Option<Footer>,
}

/// Walks block frames from the end of the header, validating checksums,
/// and stops at the footer, at corruption, or at a torn tail.
pub(crate) fn scan_body(file: &mut File, file_len: u64) -> io::Result<BodyScan> {
    file.seek(SeekFrom::Start(HEADER_BYTES))?;
    let mut rdr = BufReader::new(file);

    let mut scan = BodyScan {
        end_offset: HEADER_BYTES,
        last_block_offset: 0,
        block_count: 0,
        entry_count: 0,
        footer: None,
    };
    let mut payload = Vec::new();

    loop {
        let pos = scan.end_offset;
        let first = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };

        if first == FOOTER_MAGIC {
            // Re-read the whole footer region and validate it.
            if pos + FOOTER_BYTES <= file_len {
                let mut buf = [0u8; FOOTER_BYTES as usize];
                buf[0..4].copy_from_slice(&FOOTER_MAGIC.to_le_bytes());
                if rdr.read_exact(&mut buf[4..]).is_ok() {
                    scan.footer = Footer::decode(&buf);
                }
            }
            break;
        }

        let payload_len = first;
        if payload_len == 0 || payload_len > MAX_BLOCK_PAYLOAD {
            break;
        }
        let frame_end = pos + BLOCK_PREFIX_BYTES + payload_len as u64 + BLOCK_TRAILER_BYTES;
        if frame_end > file_len {
            break; // torn tail
        }

        let block_entries = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(_) => break,
        };
        payload.resize(payload_len as usize, 0);
        if rdr.read_exact(&mut payload).is_err() {
            break;
        }
        let crc = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(_) => break,
        };
        if codec::checksum(&payload) != crc {
            break;
        }

        scan.last_block_offset = pos;
        scan.block_count += 1;
        scan.entry_count += u64::from(block_entries);
        scan.end_offset = frame_end;
    }

    Ok(scan)
}

/// Read-only view of a `.hyd` file.
///
/// Open validates the header only; body replay happens per call so a reader
/// can be opened cheaply for a header peek. All replaying methods share the
/// same truncate-at-corruption semantics.
pub struct FileReader {
    file: BufReader<File>,
    header: Header,
    path: PathBuf,
    file_len: u64,
}

impl FileReader {
    /// Opens a `.hyd` file and validates its header.
    ///
    /// # Errors
    ///
    /// [`HydError::TruncatedHeader`] when the file is shorter than a full
    /// header, [`HydError::BadMagic`] / [`HydError::UnsupportedVersion`] /
    /// [`HydError::CorruptHeader`] for the respective header defects.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HydError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_BYTES {
            return Err(HydError::TruncatedHeader);
        }
        let mut buf = [0u8; HEADER_BYTES as usize];
        file.read_exact(&mut buf)?;
        let header = Header::decode(&buf)?;
        Ok(Self {
            file: BufReader::new(file),
            header,
            path,
            file_len,
        })
    }

    /// Returns the header snapshot read at open time.
    ///
    /// Counters reflect the last successful close and may lag the body when
    /// the file was not cleanly closed.
    #[must_use]
    pub fn header(&self) -> Header {
        self.header
    }

    /// Returns the path this reader was opened on.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total file size at open time.
    #[must_use]
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Streams every entry in file order, dead or alive, to `f` together
    /// with its absolute file offset. `f` returns `false` to stop early.
    ///
    /// Returns the number of entries streamed. Corrupt and torn tail blocks
    /// truncate the stream with a warning.
    pub fn read_all_entries<F>(&mut self, mut f: F) -> Result<u64, HydError>
    where
        F: FnMut(&Entry, u64) -> bool,
    {
        self.file.seek(SeekFrom::Start(HEADER_BYTES))?;
        let mut pos = HEADER_BYTES;
        let mut payload = Vec::new();
        let mut streamed = 0u64;

        loop {
            let first = match self.file.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(HydError::Io(e)),
            };
            if first == FOOTER_MAGIC {
                break;
            }

            let payload_len = first;
            if payload_len == 0 || payload_len > MAX_BLOCK_PAYLOAD {
                log::warn!(
                    "{}: implausible block length {} at offset {}, truncating view",
                    self.path.display(),
                    payload_len,
                    pos
                );
                break;
            }
            let frame_end = pos + BLOCK_PREFIX_BYTES + payload_len as u64 + BLOCK_TRAILER_BYTES;
            if frame_end > self.file_len {
                log::warn!(
                    "{}: torn block at offset {}, truncating view",
                    self.path.display(),
                    pos
                );
                break;
            }

            let _block_entries = match self.file.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(_) => break,
            };
            payload.resize(payload_len as usize, 0);
            if self.file.read_exact(&mut payload).is_err() {
                log::warn!(
                    "{}: torn block at offset {}, truncating view",
                    self.path.display(),
                    pos
                );
                break;
            }
            let crc = match self.file.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(_) => break,
            };
            if codec::checksum(&payload) != crc {
                log::warn!(
                    "{}: block checksum mismatch at offset {}, truncating view",
                    self.path.display(),
                    pos
                );
                break;
            }

            let mut sl = Slice::new(&payload);
            while !sl.is_empty() {
                let entry_off = pos + BLOCK_PREFIX_BYTES + sl.pos() as u64;
                let entry = match decode_entry(&mut sl) {
                    Ok(e) => e,
                    Err(_) => {
                        // Checksum passed but entries do not parse: the
                        // block was written corrupt. Cut the view here.
                        log::warn!(
                            "{}: unparseable entry at offset {}, truncating view",
                            self.path.display(),
                            entry_off
                        );
                        return Ok(streamed);
                    }
                };
                streamed += 1;
                if !f(&entry, entry_off) {
                    return Ok(streamed);
                }
            }
            pos = frame_end;
        }

        Ok(streamed)
    }

    /// Replays the body and builds the live index.
    ///
    /// Returns the key → file-offset map of live user entries plus the
    /// swamp name from the newest Metadata entry, if any. Insert/Update
    /// installs or overwrites a key, Delete removes it, Metadata is kept
    /// out of the user index.
    pub fn load_index(&mut self) -> Result<(BTreeMap<String, u64>, Option<String>), HydError> {
        let mut index = BTreeMap::new();
        let mut swamp_name = None;
        let path = self.path.clone();
        self.read_all_entries(|entry, offset| {
            match entry.op {
                Operation::Insert | Operation::Update => {
                    index.insert(entry.key.clone(), offset);
                }
                Operation::Delete => {
                    index.remove(&entry.key);
                }
                Operation::Metadata => match std::str::from_utf8(&entry.data) {
                    Ok(name) => swamp_name = Some(name.to_string()),
                    Err(_) => log::warn!(
                        "{}: metadata entry at offset {} is not UTF-8, ignoring",
                        path.display(),
                        offset
                    ),
                },
            }
            true
        })?;
        Ok((index, swamp_name))
    }

    /// Reads the single entry starting at `offset`.
    ///
    /// The offset must come from [`load_index`](FileReader::load_index) or
    /// [`read_all_entries`](FileReader::read_all_entries); anything else is
    /// reported as a corrupt block.
    pub fn entry_at(&mut self, offset: u64) -> Result<Entry, HydError> {
        if offset < HEADER_BYTES || offset >= self.file_len {
            return Err(HydError::CorruptBlock { offset });
        }
        self.file.seek(SeekFrom::Start(offset))?;

        let corrupt = |_| HydError::CorruptBlock { offset };
        let op_byte = self.file.read_u8().map_err(corrupt)?;
        let op = Operation::from_u8(op_byte).ok_or(HydError::CorruptBlock { offset })?;
        let key_len = self.file.read_u16::<LittleEndian>().map_err(corrupt)? as usize;
        let data_len = self.file.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
        if data_len as u64 > self.file_len {
            return Err(HydError::CorruptBlock { offset });
        }
        let mut key_bytes = vec![0u8; key_len];
        self.file.read_exact(&mut key_bytes).map_err(corrupt)?;
        let mut data = vec![0u8; data_len];
        self.file.read_exact(&mut data).map_err(corrupt)?;
        let key = String::from_utf8(key_bytes).map_err(|_| HydError::CorruptBlock { offset })?;
        Ok(Entry { op, key, data })
    }

    /// Computes the fragmentation ratio of the file body.
    ///
    /// An entry is live when it is a Metadata entry or when its key carries
    /// at least one Insert/Update anywhere in the file; everything beyond
    /// one live entry per key is overwritten or deleted weight. Returns
    /// `(ratio, live_count, total_count)` with ratio 0 for an empty body.
    pub fn fragmentation(&mut self) -> Result<(f64, u64, u64), HydError> {
        let mut total = 0u64;
        let mut meta = 0u64;
        let mut data_keys: HashSet<String> = HashSet::new();
        self.read_all_entries(|entry, _| {
            total += 1;
            match entry.op {
                Operation::Insert | Operation::Update => {
                    data_keys.insert(entry.key.clone());
                }
                Operation::Metadata => meta += 1,
                Operation::Delete => {}
            }
            true
        })?;

        let live = meta + data_keys.len() as u64;
        if total == 0 {
            return Ok((0.0, 0, 0));
        }
        let ratio = (total - live) as f64 / total as f64;
        Ok((ratio, live, total))
    }
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("path", &self.path)
            .field("file_len", &self.file_len)
            .field("header", &self.header)
            .finish()
    }
}
