//! Per-swamp conversion pipeline.
//!
//! Each swamp runs the whole pipeline on one worker:
//! load + dedup → (skip empty | dry-run stop) → write `.hyd` → verify →
//! delete the V1 folder. Failures are attributed to the phase they struck
//! in; cleanup trouble after a successful migration only warns.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use hydfile::{Entry, FileReader, FileWriter, DEFAULT_MAX_BLOCK_SIZE};
use legacy::SwampLoad;

use crate::{Counters, FailedSwamp, MigrateOptions, Phase};

/// Runs the pipeline for one swamp folder, updating the shared counters.
pub(crate) fn migrate_swamp(
    folder: &Path,
    options: &MigrateOptions,
    counters: &Counters,
) -> Result<(), FailedSwamp> {
    let fail = |phase: Phase, error: String| FailedSwamp {
        swamp: folder.display().to_string(),
        phase,
        error,
    };

    // Load and deduplicate; meta problems warn inside the loader.
    let load = legacy::load_folder(folder)
        .map_err(|e| fail(Phase::Load, e.to_string()))?;
    counters
        .raw_entries
        .fetch_add(load.raw_entries, Ordering::Relaxed);
    counters
        .duplicate_keys
        .fetch_add(load.duplicate_keys, Ordering::Relaxed);

    let old_bytes =
        folder_size(folder).map_err(|e| fail(Phase::Convert, e.to_string()))?;
    counters.old_bytes.fetch_add(old_bytes, Ordering::Relaxed);

    // Empty swamps produce no .hyd at all.
    if load.entries.is_empty() {
        log::info!("{}: no records, skipping", folder.display());
        counters.empty_skipped.fetch_add(1, Ordering::Relaxed);
        counters.successful.fetch_add(1, Ordering::Relaxed);
        if options.delete_old && !options.dry_run {
            delete_folder(folder);
        }
        return Ok(());
    }

    if options.dry_run {
        counters
            .entries
            .fetch_add(load.entries.len() as u64, Ordering::Relaxed);
        counters.successful.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    let hyd_path = hyd_sibling(folder);
    if hyd_path.exists() {
        // Stale artifact of an interrupted run; the V1 folder is still the
        // authoritative copy, so replace the file wholesale.
        fs::remove_file(&hyd_path).map_err(|e| fail(Phase::Convert, e.to_string()))?;
    }

    write_swamp(&hyd_path, &load).map_err(|e| fail(Phase::Write, e.to_string()))?;

    if options.verify {
        if let Err(error) = verify_swamp(&hyd_path, &load) {
            let _ = fs::remove_file(&hyd_path);
            return Err(fail(Phase::Verify, error));
        }
    }

    if let Ok(meta) = fs::metadata(&hyd_path) {
        counters.new_bytes.fetch_add(meta.len(), Ordering::Relaxed);
    }
    counters
        .entries
        .fetch_add(load.entries.len() as u64, Ordering::Relaxed);
    counters.successful.fetch_add(1, Ordering::Relaxed);

    if options.delete_old {
        delete_folder(folder);
    }
    Ok(())
}

/// Writes one deduplicated swamp into a fresh `.hyd` file.
fn write_swamp(path: &Path, load: &SwampLoad) -> Result<(), hydfile::HydError> {
    let mut writer = FileWriter::open(path, DEFAULT_MAX_BLOCK_SIZE)?;
    if !load.name.is_empty() {
        writer.write_entry(&Entry::metadata(load.name.clone().into_bytes()))?;
    }
    for (key, segment) in &load.entries {
        writer.write_entry(&Entry::insert(key.clone(), segment.clone()))?;
    }
    writer.close()
}

/// Asserts every source key landed in the new file's index.
fn verify_swamp(path: &Path, load: &SwampLoad) -> Result<(), String> {
    let mut reader = FileReader::open(path).map_err(|e| e.to_string())?;
    let (index, _) = reader.load_index().map_err(|e| e.to_string())?;
    for key in load.entries.keys() {
        if !index.contains_key(key) {
            return Err(format!("key {:?} missing from the new index", key));
        }
    }
    Ok(())
}

/// `{folder}.hyd` beside the V1 folder.
fn hyd_sibling(folder: &Path) -> PathBuf {
    let mut name = OsString::from(folder.as_os_str());
    name.push(".hyd");
    PathBuf::from(name)
}

/// Sums the sizes of the folder's regular files.
fn folder_size(folder: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Removes the folder's files, then the folder. The swamp has already been
/// migrated and verified at this point, so trouble here is only a warning.
fn delete_folder(folder: &Path) {
    let result = (|| -> io::Result<()> {
        for entry in fs::read_dir(folder)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        fs::remove_dir(folder)
    })();
    if let Err(e) = result {
        log::warn!(
            "{}: migrated but the V1 folder could not be removed: {}",
            folder.display(),
            e
        );
    }
}
