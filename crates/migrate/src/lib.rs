//! # Migrate — one-shot V1 → V2 conversion
//!
//! Walks a data tree, finds every V1 swamp folder, and converts each one
//! into a sibling `.hyd` file:
//!
//! ```text
//! discover → [worker pool] → load + dedup → write .hyd → verify → delete V1
//!                 |
//!                 └─ progress reporter (periodic, advisory)
//! ```
//!
//! Swamps are independent: a fixed pool of worker threads drains a bounded
//! queue of folder paths, counters update atomically, and per-swamp
//! failures land in the report instead of aborting the run (unless
//! `stop_on_error` is set). The run assumes exclusive access to the data
//! tree; stop the database service before migrating.

mod convert;
mod discover;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;

/// Default worker-pool size.
pub const DEFAULT_PARALLEL: usize = 4;

/// Default interval between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Migration run configuration.
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Root directory to scan for V1 swamp folders.
    pub data_path: PathBuf,
    /// Parse and count only: no `.hyd` files, no deletions.
    pub dry_run: bool,
    /// Reopen each written file and assert every source key is indexed.
    pub verify: bool,
    /// Remove each V1 folder after its swamp migrates successfully.
    pub delete_old: bool,
    /// Worker-pool size, clamped to a minimum of 1.
    pub parallel: usize,
    /// Abort the run at the first failed swamp.
    pub stop_on_error: bool,
    /// Interval between progress log emissions.
    pub progress_interval: Duration,
}

impl MigrateOptions {
    /// Options with defaults for everything but the data path.
    #[must_use]
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            dry_run: false,
            verify: false,
            delete_old: false,
            parallel: DEFAULT_PARALLEL,
            stop_on_error: false,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Migrator construction errors.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("data path is empty")]
    EmptyDataPath,

    #[error("data path {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// Pipeline phase a swamp failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Load,
    Convert,
    Write,
    Verify,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Load => "load",
            Phase::Convert => "convert",
            Phase::Write => "write",
            Phase::Verify => "verify",
        };
        f.write_str(s)
    }
}

/// One failed swamp in the report.
#[derive(Debug, Clone, Serialize)]
pub struct FailedSwamp {
    /// Path of the V1 folder.
    pub swamp: String,
    pub phase: Phase,
    pub error: String,
}

/// Structured, JSON-encodable result of one migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub duration_ms: u64,
    /// Swamp folders discovered under the data path.
    pub total_swamps: u64,
    /// Swamps a worker picked up (equals total unless the run aborted).
    pub processed_swamps: u64,
    pub successful_swamps: u64,
    /// Swamps whose V1 folders held zero records; no `.hyd` was written.
    pub empty_skipped: u64,
    /// Record segments seen before deduplication.
    pub total_raw_entries: u64,
    /// Deduplicated entries written (or counted, in a dry run).
    pub total_entries: u64,
    /// Segments displaced by a later occurrence of the same key.
    pub duplicate_keys: u64,
    pub old_bytes: u64,
    pub new_bytes: u64,
    pub failed: Vec<FailedSwamp>,
    pub dry_run: bool,
}

impl MigrationReport {
    /// `true` when no swamp failed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Shared run counters, updated atomically by the workers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub processed: AtomicU64,
    pub successful: AtomicU64,
    pub empty_skipped: AtomicU64,
    pub raw_entries: AtomicU64,
    pub entries: AtomicU64,
    pub duplicate_keys: AtomicU64,
    pub old_bytes: AtomicU64,
    pub new_bytes: AtomicU64,
}

/// One-shot V1 → V2 migration over a data tree.
pub struct Migrator {
    options: MigrateOptions,
}

impl Migrator {
    /// Validates the options and builds a migrator.
    ///
    /// # Errors
    ///
    /// [`MigrateError::EmptyDataPath`] for an empty path,
    /// [`MigrateError::NotADirectory`] when the path does not name an
    /// existing directory.
    pub fn new(mut options: MigrateOptions) -> Result<Self, MigrateError> {
        if options.data_path.as_os_str().is_empty() {
            return Err(MigrateError::EmptyDataPath);
        }
        if !options.data_path.is_dir() {
            return Err(MigrateError::NotADirectory(options.data_path));
        }
        options.parallel = options.parallel.max(1);
        Ok(Self { options })
    }

    /// Runs the migration to completion and returns the report.
    ///
    /// Per-swamp failures are recorded in the report; `Err` is reserved for
    /// run-level faults such as an unreadable data tree.
    pub fn run(&self) -> Result<MigrationReport> {
        let started_at = SystemTime::now();
        let clock = Instant::now();

        let swamps = discover::discover(&self.options.data_path).with_context(|| {
            format!("scanning {}", self.options.data_path.display())
        })?;
        let total = swamps.len() as u64;
        log::info!(
            "found {} V1 swamp folder(s) under {}{}",
            total,
            self.options.data_path.display(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let counters = Arc::new(Counters::default());
        let failed: Arc<Mutex<Vec<FailedSwamp>>> = Arc::new(Mutex::new(Vec::new()));
        let abort = Arc::new(AtomicBool::new(false));

        // Bounded handoff: workers pull folder paths as they free up.
        let (job_tx, job_rx) = mpsc::sync_channel::<PathBuf>(self.options.parallel * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = Vec::with_capacity(self.options.parallel);
        for _ in 0..self.options.parallel {
            let job_rx = Arc::clone(&job_rx);
            let counters = Arc::clone(&counters);
            let failed = Arc::clone(&failed);
            let abort = Arc::clone(&abort);
            let options = self.options.clone();
            workers.push(thread::spawn(move || loop {
                let job = {
                    let rx = job_rx.lock().expect("job queue lock");
                    rx.recv()
                };
                let Ok(folder) = job else { break };
                if abort.load(Ordering::Relaxed) {
                    // Drain without processing so the feeder never blocks.
                    continue;
                }
                counters.processed.fetch_add(1, Ordering::Relaxed);
                if let Err(failure) = convert::migrate_swamp(&folder, &options, &counters) {
                    log::error!(
                        "{}: {} phase failed: {}",
                        failure.swamp,
                        failure.phase,
                        failure.error
                    );
                    failed.lock().expect("failed list lock").push(failure);
                    if options.stop_on_error {
                        abort.store(true, Ordering::Relaxed);
                    }
                }
            }));
        }

        // Progress reporter: ticks until the run signals completion.
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let reporter = {
            let counters = Arc::clone(&counters);
            let failed = Arc::clone(&failed);
            let interval = self.options.progress_interval;
            thread::spawn(move || loop {
                match done_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let failed_count = failed.lock().map(|f| f.len()).unwrap_or(0);
                        log::info!(
                            "progress: {}/{} swamps processed, {} successful, {} failed",
                            counters.processed.load(Ordering::Relaxed),
                            total,
                            counters.successful.load(Ordering::Relaxed),
                            failed_count
                        );
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            })
        };

        for folder in &swamps {
            if job_tx.send(folder.clone()).is_err() {
                break;
            }
        }
        drop(job_tx);
        for worker in workers {
            let _ = worker.join();
        }
        drop(done_tx);
        let _ = reporter.join();

        let report = MigrationReport {
            started_at_ms: epoch_ms(started_at),
            finished_at_ms: epoch_ms(SystemTime::now()),
            duration_ms: clock.elapsed().as_millis() as u64,
            total_swamps: total,
            processed_swamps: counters.processed.load(Ordering::Relaxed),
            successful_swamps: counters.successful.load(Ordering::Relaxed),
            empty_skipped: counters.empty_skipped.load(Ordering::Relaxed),
            total_raw_entries: counters.raw_entries.load(Ordering::Relaxed),
            total_entries: counters.entries.load(Ordering::Relaxed),
            duplicate_keys: counters.duplicate_keys.load(Ordering::Relaxed),
            old_bytes: counters.old_bytes.load(Ordering::Relaxed),
            new_bytes: counters.new_bytes.load(Ordering::Relaxed),
            failed: failed.lock().expect("failed list lock").clone(),
            dry_run: self.options.dry_run,
        };

        log::info!(
            "migration finished: {}/{} swamps successful, {} failed, {} entries, {} duplicates removed",
            report.successful_swamps,
            report.total_swamps,
            report.failed.len(),
            report.total_entries,
            report.duplicate_keys
        );
        Ok(report)
    }
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
