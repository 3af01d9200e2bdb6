//! Checksummed artifact download with atomic install.
//!
//! One download moves through `Downloading → Verifying → Installing →
//! Complete`, with `Error` reachable from any state. The body streams to a
//! temp path; only a verified temp file is renamed over the destination,
//! so bytes that don't hash to the expected checksum can never appear at
//! the final path. A rename failure keeps the verified temp file so the
//! install step can be retried without re-downloading.

mod speed;

pub use speed::Speedometer;

use crate::remote::{HttpClient, HttpError};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a download job exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// The uid is absent locally; a new file is created.
    Clone,
    /// The uid exists locally at a lower build; the owning file is
    /// replaced.
    Update,
}

/// One artifact transfer planned by the puller.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub kind: JobKind,
    /// Identity of the package being transferred.
    pub uid: String,
    /// Source URL streaming the artifact bytes.
    pub from: String,
    /// Temp path receiving the in-flight bytes.
    pub tmp: PathBuf,
    /// Final destination, replaced atomically after verification.
    pub dest: PathBuf,
    /// Expected SHA-256 of the artifact.
    pub checksum: String,
}

/// Download state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Downloading,
    Verifying,
    Installing,
    Complete,
    Error,
}

/// Progress sample emitted while a job runs.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub state: DownloadState,
    /// Bytes received so far.
    pub received: u64,
    /// Total bytes expected, when the server advertised a length.
    pub total: Option<u64>,
    /// Instantaneous speed in bytes/second.
    pub speed_bps: f64,
    /// Running-average speed in bytes/second.
    pub average_bps: f64,
}

/// Progress sink injected per download. The lifetime lets callers hand in
/// closures borrowing from their own stack frame.
pub type ProgressFn<'a> = dyn Fn(&DownloadProgress) + Send + Sync + 'a;

/// Errors terminating a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Transport failure while streaming the body.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Temp-file I/O failure.
    #[error("download I/O failure at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The downloaded bytes do not hash to the expected checksum.
    #[error("checksum mismatch for `{uid}`: expected {expected}, got {actual}")]
    ChecksumMismatch {
        uid: String,
        expected: String,
        actual: String,
    },

    /// The verified temp file could not be renamed into place. The temp
    /// file is kept so the install can be retried without re-downloading.
    #[error("failed to install `{uid}` to `{dest}`: {source}")]
    Install {
        uid: String,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The owning operation was cancelled mid-transfer.
    #[error("download of `{uid}` cancelled")]
    Cancelled { uid: String },
}

/// Streams, verifies and installs single artifacts.
#[derive(Debug)]
pub struct Downloader<C> {
    client: C,
}

impl<C: HttpClient> Downloader<C> {
    /// Creates a downloader over the given transport.
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Runs one job to completion.
    ///
    /// Emits a progress sample per received chunk. On any error before
    /// `Installing` the temp file is removed; an install (rename) failure
    /// retains it.
    pub async fn download(
        &self,
        job: &DownloadJob,
        on_progress: Option<&ProgressFn<'_>>,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        debug!(uid = %job.uid, from = %job.from, "download starting");

        if let Err(e) = self.transfer(job, on_progress, token).await {
            remove_temp(&job.tmp).await;
            return Err(e);
        }

        // Verifying: hash the fully-written temp file.
        emit_state(on_progress, DownloadState::Verifying);
        let tmp = job.tmp.clone();
        let actual = tokio::task::spawn_blocking(move || crate::checksum::file_sha256(&tmp))
            .await
            .map_err(|e| DownloadError::Io {
                path: job.tmp.clone(),
                source: std::io::Error::other(e),
            })?
            .map_err(|source| DownloadError::Io {
                path: job.tmp.clone(),
                source,
            })?;

        if actual != job.checksum {
            remove_temp(&job.tmp).await;
            return Err(DownloadError::ChecksumMismatch {
                uid: job.uid.clone(),
                expected: job.checksum.clone(),
                actual,
            });
        }

        // Installing: atomic replace of the destination.
        emit_state(on_progress, DownloadState::Installing);
        if let Err(source) = tokio::fs::rename(&job.tmp, &job.dest).await {
            warn!(uid = %job.uid, error = %source, "install failed; verified temp file kept");
            return Err(DownloadError::Install {
                uid: job.uid.clone(),
                dest: job.dest.clone(),
                source,
            });
        }

        emit_state(on_progress, DownloadState::Complete);
        info!(uid = %job.uid, dest = %job.dest.display(), "download complete");
        Ok(())
    }

    /// Downloading phase: stream the body into the temp file.
    async fn transfer(
        &self,
        job: &DownloadJob,
        on_progress: Option<&ProgressFn<'_>>,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let body = self.client.get_stream(&job.from).await?;
        let total = body.content_length;
        let mut stream = body.stream;

        let mut file = tokio::fs::File::create(&job.tmp)
            .await
            .map_err(|source| DownloadError::Io {
                path: job.tmp.clone(),
                source,
            })?;

        let mut speedometer = Speedometer::start();
        let mut received: u64 = 0;

        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => {
                    return Err(DownloadError::Cancelled { uid: job.uid.clone() });
                }
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            file.write_all(&chunk)
                .await
                .map_err(|source| DownloadError::Io {
                    path: job.tmp.clone(),
                    source,
                })?;

            received += chunk.len() as u64;
            let (speed_bps, average_bps) = speedometer.record(received);
            if let Some(callback) = on_progress {
                callback(&DownloadProgress {
                    state: DownloadState::Downloading,
                    received,
                    total,
                    speed_bps,
                    average_bps,
                });
            }
        }

        file.flush().await.map_err(|source| DownloadError::Io {
            path: job.tmp.clone(),
            source,
        })?;
        Ok(received)
    }
}

fn emit_state(on_progress: Option<&ProgressFn<'_>>, state: DownloadState) {
    if let Some(callback) = on_progress {
        callback(&DownloadProgress {
            state,
            received: 0,
            total: None,
            speed_bps: 0.0,
            average_bps: 0.0,
        });
    }
}

async fn remove_temp(tmp: &Path) {
    if tokio::fs::remove_file(tmp).await.is_ok() {
        debug!(path = %tmp.display(), "partial temp file removed");
    }
}
