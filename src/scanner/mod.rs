//! File state tracking for a repository working directory.
//!
//! The scanner lists package files in the working directory, compares each
//! one against the persisted per-filename ledger, and classifies it as
//! deleted, unchanged, added or changed. Stats and checksums run with
//! bounded parallelism; the refreshed ledger is produced in a single step
//! once every classification has resolved, so no partial ledger state is
//! ever observable.
//!
//! Change policy: a matching mtime+size signature is trusted as unchanged
//! and the stored checksum is reused. When either cheap field differs the
//! file is re-checksummed and compared against the stored checksum before
//! it is committed as changed, so a touched-but-identical file stays
//! unchanged.

mod debounce;
mod watcher;

pub use debounce::Debouncer;
pub use watcher::{WatchBatch, WatchOptions, Watcher};

use crate::checksum::{file_sha256, FileSignature};
use crate::engine::FilePattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default number of concurrent stat/checksum operations.
pub const DEFAULT_SCAN_WIDTH: usize = 5;

/// Classification of a file relative to the previous ledger snapshot.
///
/// The integer codes are part of the persisted ledger format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum FileStatus {
    /// Present in the ledger, gone from disk.
    Deleted,
    /// Signature (and, on a signature miss, checksum) identical.
    Unchanged,
    /// On disk but not in the ledger.
    Added,
    /// Content differs from the recorded checksum.
    Changed,
}

impl From<FileStatus> for i8 {
    fn from(status: FileStatus) -> i8 {
        match status {
            FileStatus::Deleted => -1,
            FileStatus::Unchanged => 0,
            FileStatus::Added => 1,
            FileStatus::Changed => 2,
        }
    }
}

impl TryFrom<i8> for FileStatus {
    type Error = String;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(FileStatus::Deleted),
            0 => Ok(FileStatus::Unchanged),
            1 => Ok(FileStatus::Added),
            2 => Ok(FileStatus::Changed),
            other => Err(format!("unknown file status code {other}")),
        }
    }
}

/// Persisted per-file snapshot used to classify the next scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Modification time in epoch milliseconds.
    pub mtime_ms: i64,
    /// Size in bytes.
    pub size: u64,
    /// Content checksum. Computed when a file is first seen or its cheap
    /// signature stops matching; reused otherwise.
    pub checksum: Option<String>,
    /// Status assigned by the most recent scan.
    pub status: FileStatus,
}

/// The persisted ledger: relative filename → record.
pub type Ledger = BTreeMap<String, FileRecord>;

/// One classified file change, consumed by the processing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Filename relative to the repository root.
    pub filename: String,
    /// Classification from the scan.
    pub status: FileStatus,
}

/// Per-status totals for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounts {
    pub added: usize,
    pub changed: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Result of one scan: refreshed ledger plus classified events.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Ledger snapshot reflecting the current directory state. Records for
    /// deleted files are already dropped.
    pub ledger: Ledger,
    /// Every classified file, in filename order.
    pub events: Vec<FileEvent>,
    /// Per-status totals.
    pub counts: ScanCounts,
}

/// Errors raised while scanning the working directory.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The working directory itself could not be listed.
    #[error("failed to list `{path}`: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A scan task was cancelled or panicked.
    #[error("scan task failed: {0}")]
    Task(String),
}

/// Classification produced for one file by a parallel scan task.
#[derive(Debug)]
struct Classified {
    filename: String,
    record: FileRecord,
}

/// Bounded-parallel directory scanner.
#[derive(Debug, Clone)]
pub struct Scanner {
    width: usize,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_WIDTH)
    }
}

impl Scanner {
    /// Creates a scanner running at most `width` stat/checksum operations
    /// concurrently.
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    /// Scans `dir`, classifying every file matching `pattern` against
    /// `previous`.
    pub async fn scan(
        &self,
        dir: &Path,
        previous: &Ledger,
        pattern: &FilePattern,
    ) -> Result<ScanOutcome, ScanError> {
        let filenames = list_files(dir, pattern).await?;

        let semaphore = Arc::new(Semaphore::new(self.width));
        let mut tasks: JoinSet<Option<Classified>> = JoinSet::new();

        for filename in &filenames {
            let filename = filename.clone();
            let path = dir.join(&filename);
            let prev = previous.get(&filename).cloned();
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                // Closed only when the whole scan is dropped.
                let _permit = semaphore.acquire_owned().await.ok()?;
                let baseline = prev.clone();
                let result =
                    tokio::task::spawn_blocking(move || classify_file(&path, baseline.as_ref()))
                        .await
                        .ok()?;
                resolve_classification(&filename, result, prev)
                    .map(|record| Classified { filename, record })
            });
        }

        let mut current: Ledger = Ledger::new();
        while let Some(joined) = tasks.join_next().await {
            let classified = joined.map_err(|e| ScanError::Task(e.to_string()))?;
            if let Some(c) = classified {
                current.insert(c.filename, c.record);
            }
        }

        // Ledger entries with no surviving file on disk are deletions. The
        // record is dropped here, so a deleted file is gone from the ledger
        // one cycle after it was last seen.
        let mut events = Vec::new();
        let mut counts = ScanCounts::default();

        for filename in previous.keys() {
            if !current.contains_key(filename) {
                counts.deleted += 1;
                events.push(FileEvent {
                    filename: filename.clone(),
                    status: FileStatus::Deleted,
                });
            }
        }

        for (filename, record) in &current {
            match record.status {
                FileStatus::Added => counts.added += 1,
                FileStatus::Changed => counts.changed += 1,
                FileStatus::Unchanged => counts.unchanged += 1,
                FileStatus::Deleted => {}
            }
            events.push(FileEvent {
                filename: filename.clone(),
                status: record.status,
            });
        }

        debug!(
            added = counts.added,
            changed = counts.changed,
            deleted = counts.deleted,
            unchanged = counts.unchanged,
            "scan classified"
        );

        Ok(ScanOutcome {
            ledger: current,
            events,
            counts,
        })
    }
}

/// Lists plain files in `dir` whose names match `pattern`.
async fn list_files(dir: &Path, pattern: &FilePattern) -> Result<Vec<String>, ScanError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| ScanError::ListDir {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut filenames = Vec::new();
    loop {
        let entry = entries.next_entry().await.map_err(|e| ScanError::ListDir {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let Some(entry) = entry else { break };

        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if pattern.matches(&name) {
            filenames.push(name);
        }
    }

    Ok(filenames)
}

/// Classifies one file against its previous record.
///
/// Runs on the blocking pool: both the stat and the checksum touch the
/// filesystem.
fn classify_file(path: &Path, prev: Option<&FileRecord>) -> std::io::Result<FileRecord> {
    let sig = FileSignature::probe(path)?;

    let Some(prev) = prev else {
        // First sighting: no baseline, checksum now.
        let checksum = file_sha256(path)?;
        return Ok(FileRecord {
            mtime_ms: sig.mtime_ms,
            size: sig.size,
            checksum: Some(checksum),
            status: FileStatus::Added,
        });
    };

    if sig.mtime_ms == prev.mtime_ms && sig.size == prev.size {
        return Ok(FileRecord {
            mtime_ms: sig.mtime_ms,
            size: sig.size,
            checksum: prev.checksum.clone(),
            status: FileStatus::Unchanged,
        });
    }

    // Cheap signature differs; the checksum is the tie-breaker.
    let checksum = file_sha256(path)?;
    let status = match &prev.checksum {
        Some(old) if *old == checksum => FileStatus::Unchanged,
        _ => FileStatus::Changed,
    };

    Ok(FileRecord {
        mtime_ms: sig.mtime_ms,
        size: sig.size,
        checksum: Some(checksum),
        status,
    })
}

/// Resolves one classification result against the file's previous record.
///
/// A file that vanished between the listing and the stat is genuinely gone
/// and falls through to the deletion sweep. Any other read failure on a
/// listed file keeps the previous record, so a transient error never
/// untracks a live package; the next scan retries it. A file with no
/// baseline stays out of the ledger until it can be read.
fn resolve_classification(
    filename: &str,
    result: std::io::Result<FileRecord>,
    prev: Option<FileRecord>,
) -> Option<FileRecord> {
    match result {
        Ok(record) => Some(record),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(filename, "file removed mid-scan");
            None
        }
        Err(e) => match prev {
            Some(prev) => {
                warn!(filename, error = %e, "read failed; keeping previous record");
                Some(FileRecord {
                    status: FileStatus::Unchanged,
                    ..prev
                })
            }
            None => {
                warn!(filename, error = %e, "read failed; file stays untracked");
                None
            }
        },
    }
}
