//! Offline defragmentation of a `.hyd` file.
//!
//! Compaction rewrites a file so it carries exactly one Insert entry per
//! live key (plus the swamp-name Metadata entry when present), restoring
//! fragmentation to zero. The rewrite goes to a sibling temp file which is
//! fsynced and then renamed over the original, so a crash at any point
//! leaves the original intact.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::format::Entry;
use crate::reader::FileReader;
use crate::writer::FileWriter;
use crate::HydError;

/// Outcome of one [`Compactor::compact`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionResult {
    /// `false` when fragmentation was below the threshold and the file was
    /// left untouched.
    pub compacted: bool,
    pub old_file_size: u64,
    pub new_file_size: u64,
    /// Entries dropped by the rewrite: total before minus live keys.
    pub removed_entries: u64,
    /// Fragmentation measured before the rewrite.
    pub fragmentation: f64,
}

/// Threshold-gated compactor for a single `.hyd` file.
pub struct Compactor {
    path: PathBuf,
    max_block_size: usize,
    threshold: f64,
}

impl Compactor {
    /// Creates a compactor for `path`.
    ///
    /// # Errors
    ///
    /// [`HydError::InvalidConfig`] when `max_block_size` is zero or
    /// `threshold` falls outside `[0, 1]`.
    pub fn new<P: AsRef<Path>>(
        path: P,
        max_block_size: usize,
        threshold: f64,
    ) -> Result<Self, HydError> {
        if max_block_size == 0 {
            return Err(HydError::InvalidConfig("max_block_size must be nonzero"));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(HydError::InvalidConfig("threshold must be within [0, 1]"));
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            max_block_size,
            threshold,
        })
    }

    /// Measures fragmentation and compares it against the threshold.
    ///
    /// Returns `(should_compact, fragmentation)`; true iff the ratio is at
    /// or above the threshold.
    pub fn should_compact(&self) -> Result<(bool, f64), HydError> {
        let mut reader = FileReader::open(&self.path)?;
        let (ratio, _, _) = reader.fragmentation()?;
        Ok((ratio >= self.threshold, ratio))
    }

    /// Rewrites the file when fragmentation is at or above the threshold.
    ///
    /// Live keys are rewritten as Insert entries in ascending file-offset
    /// order (deterministic output, preserves locality), preceded by a
    /// Metadata entry when the source carries a swamp name. The original is
    /// replaced only after the replacement is durable.
    ///
    /// # Failure semantics
    ///
    /// An error before the rename leaves the temp file behind for
    /// inspection and the original untouched; a rename failure deletes the
    /// temp and surfaces the error.
    pub fn compact(&self) -> Result<CompactionResult, HydError> {
        let mut reader = FileReader::open(&self.path)?;
        let old_file_size = reader.file_len();
        let (fragmentation, _, total_before) = reader.fragmentation()?;

        if fragmentation < self.threshold {
            return Ok(CompactionResult {
                compacted: false,
                old_file_size,
                new_file_size: old_file_size,
                removed_entries: 0,
                fragmentation,
            });
        }

        let (index, swamp_name) = reader.load_index()?;
        let live_count = index.len() as u64;

        // Live entries in ascending file-offset order.
        let mut live: Vec<(u64, String)> = index.into_iter().map(|(k, off)| (off, k)).collect();
        live.sort_unstable_by_key(|(off, _)| *off);

        let tmp_path = tmp_sibling(&self.path);
        // A leftover temp from an earlier failed run must not be appended to.
        let _ = fs::remove_file(&tmp_path);

        let mut writer = FileWriter::open(&tmp_path, self.max_block_size)?;
        if let Some(name) = swamp_name {
            if !name.is_empty() {
                writer.write_entry(&Entry::metadata(name.into_bytes()))?;
            }
        }
        for (offset, _key) in &live {
            let entry = reader.entry_at(*offset)?;
            writer.write_entry(&Entry::insert(entry.key, entry.data))?;
        }
        writer.close()?;

        let new_file_size = fs::metadata(&tmp_path)?.len();

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(HydError::Io(e));
        }
        // Make the rename durable before reporting success.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(CompactionResult {
            compacted: true,
            old_file_size,
            new_file_size,
            removed_entries: total_before - live_count,
            fragmentation,
        })
    }
}

/// `<file>.tmp` beside the original, keeping the full original file name.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor")
            .field("path", &self.path)
            .field("max_block_size", &self.max_block_size)
            .field("threshold", &self.threshold)
            .finish()
    }
}
