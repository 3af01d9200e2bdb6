//! Pull: diff a remote manifest against the local registry and transfer
//! the difference.
//!
//! Planning is pure: clone jobs for uids the local registry has never
//! seen, update jobs for uids whose remote build is numerically greater
//! than the local one. Jobs execute sequentially (download bandwidth and
//! disk contention make parallel transfer not worth the complexity) and
//! one failed job never aborts its siblings.

use crate::download::{DownloadError, DownloadJob, DownloadProgress, Downloader, JobKind};
use crate::layout::ControlDir;
use crate::registry::RegistrySnapshot;
use crate::remote::{FetchError, Fetcher, HttpClient, RemoteDescriptor, RemoteManifest};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-job result reported by a pull.
#[derive(Debug)]
pub struct PullOutcome {
    pub uid: String,
    pub kind: JobKind,
    pub result: Result<(), DownloadError>,
}

/// Progress sink for a whole pull; the first argument attributes the
/// sample to a uid.
pub type PullProgressFn<'a> = dyn Fn(&str, &DownloadProgress) + Send + Sync + 'a;

/// Computes the download jobs needed to bring the local registry up to
/// `manifest`.
///
/// Clone destinations are derived from the uid plus the remote filename's
/// extension; update destinations are the existing local filename. Build
/// numbers compare as integers.
pub fn plan(
    manifest: &RemoteManifest,
    local: &RegistrySnapshot,
    remote_url: &str,
    control: &ControlDir,
    repo_root: &Path,
) -> Vec<DownloadJob> {
    let mut jobs = Vec::new();

    for entry in manifest {
        let (kind, dest) = match local.doc.packages.get(&entry.uid) {
            None => (
                JobKind::Clone,
                repo_root.join(clone_filename(&entry.uid, &entry.filename)),
            ),
            Some(record) if entry.build > record.build => {
                (JobKind::Update, repo_root.join(&record.filename))
            }
            Some(_) => continue,
        };

        jobs.push(DownloadJob {
            kind,
            uid: entry.uid.clone(),
            from: format!("{remote_url}?file={}", entry.uid),
            tmp: control.download_tmp_path(&entry.uid),
            dest,
            checksum: entry.checksum.clone(),
        });
    }

    debug!(
        clones = jobs.iter().filter(|j| j.kind == JobKind::Clone).count(),
        updates = jobs.iter().filter(|j| j.kind == JobKind::Update).count(),
        "pull planned"
    );
    jobs
}

/// New local filename for a cloned uid: the uid itself plus the remote
/// file's extension.
fn clone_filename(uid: &str, remote_filename: &str) -> String {
    match Path::new(remote_filename).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{uid}.{ext}"),
        None => uid.to_string(),
    }
}

/// Drives fetch, plan and sequential download for one remote.
#[derive(Debug)]
pub struct Puller<C> {
    fetcher: Fetcher<C>,
    downloader: Downloader<C>,
    control: ControlDir,
}

impl<C: HttpClient + Clone> Puller<C> {
    /// Creates a puller sharing one transport between fetch and download.
    pub fn new(client: C, control: ControlDir, expected_type: impl Into<String>) -> Self {
        Self {
            fetcher: Fetcher::new(client.clone(), control.clone(), expected_type),
            downloader: Downloader::new(client),
            control,
        }
    }

    /// Access to the underlying fetcher (for fetch-only refreshes).
    pub fn fetcher(&self) -> &Fetcher<C> {
        &self.fetcher
    }

    /// Pulls `remote` against the given local snapshot.
    ///
    /// Returns one outcome per planned job. A fetch failure aborts the
    /// pull before any transfer; per-job failures are recorded and the
    /// remaining jobs still run. Cancellation stops after the in-flight
    /// job.
    pub async fn pull(
        &self,
        remote: &RemoteDescriptor,
        local: &RegistrySnapshot,
        repo_root: &Path,
        on_progress: Option<&PullProgressFn<'_>>,
        token: &CancellationToken,
    ) -> Result<Vec<PullOutcome>, FetchError> {
        let manifest = self.fetcher.fetch(remote).await?;
        let jobs = plan(&manifest, local, &remote.url, &self.control, repo_root);
        info!(remote = %remote.name, jobs = jobs.len(), "pull starting");

        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let result = match on_progress {
                Some(callback) => {
                    let per_job = |progress: &DownloadProgress| callback(&job.uid, progress);
                    self.downloader.download(job, Some(&per_job), token).await
                }
                None => self.downloader.download(job, None, token).await,
            };

            if let Err(e) = &result {
                warn!(uid = %job.uid, error = %e, "pull job failed");
            }
            let cancelled = matches!(result, Err(DownloadError::Cancelled { .. }));
            outcomes.push(PullOutcome {
                uid: job.uid.clone(),
                kind: job.kind,
                result,
            });
            if cancelled {
                break;
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PackageRecord, RegistryDoc};
    use crate::remote::ManifestEntry;
    use tempfile::TempDir;

    fn entry(uid: &str, build: u64, filename: &str) -> ManifestEntry {
        ManifestEntry {
            uid: uid.to_string(),
            build,
            filename: filename.to_string(),
            checksum: "aa".to_string(),
        }
    }

    fn snapshot_with(entries: &[(&str, u64, &str)]) -> RegistrySnapshot {
        let mut doc = RegistryDoc::default();
        for (uid, build, filename) in entries {
            doc.packages.insert(
                uid.to_string(),
                PackageRecord {
                    build: *build,
                    filename: filename.to_string(),
                },
            );
            doc.files.insert(filename.to_string(), uid.to_string());
        }
        RegistrySnapshot {
            doc,
            tags: Default::default(),
        }
    }

    #[test]
    fn test_plan_splits_clones_and_updates() {
        let dir = TempDir::new().unwrap();
        let control = ControlDir::open(dir.path()).unwrap();
        let local = snapshot_with(&[("u-old", 2, "old.pkg"), ("u-same", 1, "same.pkg")]);
        let manifest = vec![
            entry("u-new", 1, "new.pkg"),
            entry("u-old", 3, "renamed-on-remote.pkg"),
            entry("u-same", 1, "same.pkg"),
        ];

        let jobs = plan(&manifest, &local, "http://peer/main", &control, dir.path());

        assert_eq!(jobs.len(), 2);
        let clone = jobs.iter().find(|j| j.kind == JobKind::Clone).unwrap();
        assert_eq!(clone.uid, "u-new");
        assert_eq!(clone.dest, dir.path().join("u-new.pkg"));
        assert_eq!(clone.from, "http://peer/main?file=u-new");

        // Updates keep the existing local filename, not the remote's.
        let update = jobs.iter().find(|j| j.kind == JobKind::Update).unwrap();
        assert_eq!(update.uid, "u-old");
        assert_eq!(update.dest, dir.path().join("old.pkg"));
    }

    #[test]
    fn test_plan_compares_builds_numerically() {
        // A remote build of 3 against a local build of 2 must update even
        // though "3" < "2" never holds lexically for e.g. "10" vs "2".
        let dir = TempDir::new().unwrap();
        let control = ControlDir::open(dir.path()).unwrap();
        let local = snapshot_with(&[("u1", 2, "a.pkg")]);

        let manifest: RemoteManifest = serde_json::from_str(
            r#"[{"uid":"u1","build":"10","filename":"a.pkg","checksum":"aa"}]"#,
        )
        .unwrap();
        let jobs = plan(&manifest, &local, "http://peer/main", &control, dir.path());
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::Update);
    }

    #[test]
    fn test_plan_skips_equal_and_older_builds() {
        let dir = TempDir::new().unwrap();
        let control = ControlDir::open(dir.path()).unwrap();
        let local = snapshot_with(&[("u1", 5, "a.pkg")]);
        let manifest = vec![entry("u1", 5, "a.pkg"), entry("u1", 4, "a.pkg")];

        let jobs = plan(&manifest, &local, "http://peer/main", &control, dir.path());
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_clone_filename_keeps_extension() {
        assert_eq!(clone_filename("u1", "pkg.zip"), "u1.zip");
        assert_eq!(clone_filename("u1", "noext"), "u1");
    }
}
