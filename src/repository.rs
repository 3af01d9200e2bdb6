//! Repository facade tying discovery, registry maintenance and remote
//! sync together behind one handle.
//!
//! A [`Repository`] owns the mutable state (registry document, scan
//! ledger, configured remotes) behind an async mutex, so one-shot
//! discovery, watch mode and pulls can be driven concurrently without
//! interleaving mutations. Construction wires the production HTTP client;
//! tests inject mock transports through [`Repository::open_with_client`].

use crate::download::DownloadError;
use crate::engine::{EngineRegistry, FilePattern};
use crate::layout::ControlDir;
use crate::pipeline::{Pipeline, PipelineReport, RetryPolicy};
use crate::pull::{PullOutcome, PullProgressFn, Puller};
use crate::registry::{PackageRegistry, QueryHit, RegistryError, RegistrySnapshot};
use crate::remote::{
    FetchError, HttpClient, HttpError, RemoteDescriptor, RemoteError, RemoteManifest, Remotes,
    ReqwestClient, DEFAULT_HTTP_TIMEOUT, REPOSITORY_TYPE,
};
use crate::scanner::{
    Ledger, ScanCounts, ScanError, Scanner, WatchBatch, WatchOptions, Watcher, DEFAULT_SCAN_WIDTH,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tuning knobs for a repository handle.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Repository type peers must advertise before their manifests are
    /// trusted.
    pub expected_remote_type: String,
    /// Concurrent stat/checksum width for scans.
    pub scan_width: usize,
    /// Watch mode polling and debouncing.
    pub watch: WatchOptions,
    /// Retry schedule for failed registry mutations.
    pub retry: RetryPolicy,
    /// Timeout applied to every remote HTTP request.
    pub http_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            expected_remote_type: REPOSITORY_TYPE.to_string(),
            scan_width: DEFAULT_SCAN_WIDTH,
            watch: WatchOptions::default(),
            retry: RetryPolicy::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Top-level error for repository operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("failed to persist ledger: {0}")]
    Ledger(#[source] std::io::Error),

    #[error("failed to open control directory: {0}")]
    Layout(#[source] std::io::Error),
}

/// Summary of one discovery pass.
#[derive(Debug)]
pub struct DiscoverReport {
    /// Per-status scan totals.
    pub counts: ScanCounts,
    /// Registry mutation outcome.
    pub pipeline: PipelineReport,
    /// Packages untracked because their owning file disappeared between
    /// runs.
    pub reconciled: usize,
}

/// Summary of one pull.
#[derive(Debug)]
pub struct PullReport {
    /// Per-job transfer outcomes, in plan order.
    pub outcomes: Vec<PullOutcome>,
    /// Discovery pass that absorbed the downloaded files into the
    /// registry.
    pub discovery: DiscoverReport,
}

impl PullReport {
    /// Whether every planned transfer landed.
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

struct State {
    registry: PackageRegistry,
    ledger: Ledger,
    remotes: Remotes,
}

/// A package repository rooted at a working directory.
pub struct Repository<C> {
    root: PathBuf,
    control: ControlDir,
    config: RepositoryConfig,
    pattern: FilePattern,
    pipeline: Pipeline,
    puller: Puller<C>,
    state: Mutex<State>,
}

impl Repository<ReqwestClient> {
    /// Opens a repository with the production HTTP transport.
    pub fn open(
        root: impl Into<PathBuf>,
        config: RepositoryConfig,
        engines: EngineRegistry,
    ) -> Result<Self, Error> {
        let client = ReqwestClient::with_timeout(config.http_timeout)?;
        Self::open_with_client(root, config, engines, client)
    }
}

impl<C: HttpClient + Clone> Repository<C> {
    /// Opens a repository over a caller-supplied transport.
    pub fn open_with_client(
        root: impl Into<PathBuf>,
        config: RepositoryConfig,
        engines: EngineRegistry,
        client: C,
    ) -> Result<Self, Error> {
        let root = root.into();
        let control = ControlDir::open(&root).map_err(Error::Layout)?;
        let pattern = engines.file_pattern();

        let registry = PackageRegistry::load(control.clone(), engines, root.clone())?;
        let ledger: Ledger = control
            .read_json_or_default(&control.ledger_path())
            .map_err(Error::Ledger)?;
        let remotes = Remotes::load(control.clone())?;

        let puller = Puller::new(client, control.clone(), config.expected_remote_type.clone());

        Ok(Self {
            root,
            control,
            pipeline: Pipeline::new(config.retry.clone()),
            config,
            pattern,
            puller,
            state: Mutex::new(State {
                registry,
                ledger,
                remotes,
            }),
        })
    }

    /// Working directory this repository tracks.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Owned snapshot of the current registry state.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.state.lock().await.registry.snapshot()
    }

    /// One-shot discovery: scan, reconcile, apply mutations, persist.
    pub async fn discover(&self) -> Result<DiscoverReport, Error> {
        self.discover_with(&CancellationToken::new()).await
    }

    /// Discovery pass that can be cut short by cancellation.
    pub async fn discover_with(&self, token: &CancellationToken) -> Result<DiscoverReport, Error> {
        let mut state = self.state.lock().await;
        let scanner = Scanner::new(self.config.scan_width);
        let outcome = scanner
            .scan(&self.root, &state.ledger, &self.pattern)
            .await?;

        // Files that vanished while no scan was running leave orphaned
        // registry entries behind; drop those before applying events.
        let present: BTreeSet<String> = outcome.ledger.keys().cloned().collect();
        let reconciled = state.registry.reconcile_missing(&present)?;

        let report = self
            .pipeline
            .run(outcome.events, &mut state.registry, token)
            .await;

        state.ledger = outcome.ledger;
        self.persist_ledger(&state.ledger)?;

        info!(
            added = outcome.counts.added,
            changed = outcome.counts.changed,
            deleted = outcome.counts.deleted,
            reconciled,
            dropped = report.dropped,
            "discovery complete"
        );
        Ok(DiscoverReport {
            counts: outcome.counts,
            pipeline: report,
            reconciled,
        })
    }

    /// Continuous discovery until `token` is cancelled.
    ///
    /// Each debounced event batch runs through the same mutation pipeline
    /// as one-shot discovery, with the ledger persisted after every batch.
    pub async fn watch(&self, token: CancellationToken) -> Result<(), Error> {
        let initial = self.state.lock().await.ledger.clone();
        let watcher = Watcher::new(
            Scanner::new(self.config.scan_width),
            self.config.watch.clone(),
            self.root.clone(),
            self.pattern.clone(),
        );

        let (tx, mut rx) = mpsc::channel::<WatchBatch>(8);
        let watch_task = tokio::spawn(watcher.run(initial, tx, token.clone()));

        while let Some(batch) = rx.recv().await {
            let mut state = self.state.lock().await;
            let report = self
                .pipeline
                .run(batch.events, &mut state.registry, &token)
                .await;
            state.ledger = batch.ledger;
            self.persist_ledger(&state.ledger)?;
            if report.cancelled {
                break;
            }
        }

        match watch_task.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "watch task panicked"),
        }
        Ok(())
    }

    /// Adds a named remote.
    pub async fn add_remote(&self, name: &str, url: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.remotes.add(RemoteDescriptor {
            name: name.to_string(),
            url: url.to_string(),
        })?;
        Ok(())
    }

    /// Removes a named remote. Its cached manifest is removed with it.
    pub async fn remove_remote(&self, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.remotes.remove(name)?;
        Ok(())
    }

    /// The configured remotes, in name order.
    pub async fn remotes(&self) -> Vec<RemoteDescriptor> {
        self.state.lock().await.remotes.list()
    }

    /// Fetches and validates the manifest of a named remote, refreshing
    /// its cache.
    pub async fn fetch(&self, name: &str) -> Result<RemoteManifest, Error> {
        let descriptor = self.descriptor(name).await?;
        Ok(self.puller.fetcher().fetch(&descriptor).await?)
    }

    /// Pulls a named remote: fetch, plan, transfer, then rediscover so the
    /// registry reflects the downloaded files.
    pub async fn pull(
        &self,
        name: &str,
        on_progress: Option<&PullProgressFn<'_>>,
        token: &CancellationToken,
    ) -> Result<PullReport, Error> {
        let descriptor = self.descriptor(name).await?;
        let snapshot = self.snapshot().await;

        let outcomes = self
            .puller
            .pull(&descriptor, &snapshot, &self.root, on_progress, token)
            .await?;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        if failed > 0 {
            warn!(remote = %name, failed, "pull finished with failed transfers");
        }
        if outcomes
            .iter()
            .any(|o| matches!(o.result, Err(DownloadError::Cancelled { .. })))
        {
            info!(remote = %name, "pull cancelled");
        }

        let discovery = self.discover_with(token).await?;
        Ok(PullReport {
            outcomes,
            discovery,
        })
    }

    /// Queries tracked packages through the engines' predicate matcher.
    pub async fn query(&self, predicate: &str) -> Result<Vec<QueryHit>, Error> {
        let state = self.state.lock().await;
        Ok(state.registry.query(predicate)?)
    }

    async fn descriptor(&self, name: &str) -> Result<RemoteDescriptor, Error> {
        let state = self.state.lock().await;
        state
            .remotes
            .get(name)
            .ok_or_else(|| Error::Remote(RemoteError::Unknown {
                name: name.to_string(),
            }))
    }

    fn persist_ledger(&self, ledger: &Ledger) -> Result<(), Error> {
        self.control
            .write_json(&self.control.ledger_path(), ledger)
            .map_err(Error::Ledger)
    }
}
