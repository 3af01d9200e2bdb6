//! Remote manifest retrieval.
//!
//! HTTP remotes are probed first: the server's root info document must
//! self-identify as a compatible repository before its manifest endpoint is
//! trusted. Local-path remotes read the sibling repository's own registry
//! and ledger directly. In both cases the cached manifest under
//! `remotes/<name>.json` is replaced only after the entire fetch succeeds;
//! a failed fetch leaves the previous cache authoritative.

use super::{HttpClient, HttpError, ManifestEntry, RemoteDescriptor, RemoteManifest, RootInfo};
use crate::layout::ControlDir;
use crate::registry::RegistryDoc;
use crate::scanner::Ledger;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while fetching a remote manifest.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure or non-success status.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The peer does not self-identify as a compatible repository.
    #[error("`{url}` is not a {expected} repository (reports type `{found}`)")]
    NotARepository {
        url: String,
        expected: String,
        found: String,
    },

    /// A response body could not be parsed.
    #[error("malformed response from `{url}`: {reason}")]
    Malformed { url: String, reason: String },

    /// A local-path remote's documents could not be read.
    #[error("failed to read local remote at `{path}`: {reason}")]
    LocalRemote { path: PathBuf, reason: String },

    /// Persisting the fetched manifest failed.
    #[error("failed to cache manifest for `{name}`: {source}")]
    Cache {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Retrieves and caches remote manifests.
#[derive(Debug)]
pub struct Fetcher<C> {
    client: C,
    control: ControlDir,
    expected_type: String,
}

impl<C: HttpClient> Fetcher<C> {
    /// Creates a fetcher caching into `control` and requiring peers to
    /// identify as `expected_type`.
    pub fn new(client: C, control: ControlDir, expected_type: impl Into<String>) -> Self {
        Self {
            client,
            control,
            expected_type: expected_type.into(),
        }
    }

    /// Fetches the manifest for `remote` and replaces its cache entry.
    pub async fn fetch(&self, remote: &RemoteDescriptor) -> Result<RemoteManifest, FetchError> {
        let manifest = if remote.is_http() {
            self.fetch_http(remote).await?
        } else {
            self.fetch_local(remote)?
        };

        self.control
            .write_json(&self.control.manifest_path(&remote.name), &manifest)
            .map_err(|source| FetchError::Cache {
                name: remote.name.clone(),
                source,
            })?;

        info!(
            remote = %remote.name,
            packages = manifest.len(),
            "manifest fetched and cached"
        );
        Ok(manifest)
    }

    /// Last successfully cached manifest for `name`, if any.
    pub fn cached(&self, name: &str) -> Option<RemoteManifest> {
        let bytes = std::fs::read(self.control.manifest_path(name)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// HTTP strategy: validate the root info document, then fetch the
    /// manifest endpoint itself.
    async fn fetch_http(&self, remote: &RemoteDescriptor) -> Result<RemoteManifest, FetchError> {
        let root_url = server_root(&remote.url);

        debug!(remote = %remote.name, url = %root_url, "probing remote root");
        let body = self.client.get(&root_url).await?;
        let info: RootInfo =
            serde_json::from_slice(&body).map_err(|e| FetchError::Malformed {
                url: root_url.clone(),
                reason: e.to_string(),
            })?;

        if info.kind != self.expected_type {
            return Err(FetchError::NotARepository {
                url: root_url,
                expected: self.expected_type.clone(),
                found: info.kind,
            });
        }
        debug!(remote = %remote.name, version = %info.version, "compatible repository found");

        let body = self.client.get(&remote.url).await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Malformed {
            url: remote.url.clone(),
            reason: e.to_string(),
        })
    }

    /// Local-path strategy: read the sibling repository's registry and
    /// ledger directly and synthesize the manifest.
    fn fetch_local(&self, remote: &RemoteDescriptor) -> Result<RemoteManifest, FetchError> {
        let sibling = ControlDir::open(Path::new(&remote.url)).map_err(|e| {
            FetchError::LocalRemote {
                path: PathBuf::from(&remote.url),
                reason: e.to_string(),
            }
        })?;

        let doc: RegistryDoc = sibling
            .read_json_or_default(&sibling.registry_path())
            .map_err(|e| FetchError::LocalRemote {
                path: PathBuf::from(&remote.url),
                reason: e.to_string(),
            })?;
        let ledger: Ledger = sibling
            .read_json_or_default(&sibling.ledger_path())
            .map_err(|e| FetchError::LocalRemote {
                path: PathBuf::from(&remote.url),
                reason: e.to_string(),
            })?;

        let mut manifest = Vec::with_capacity(doc.packages.len());
        for (uid, record) in &doc.packages {
            let Some(checksum) = ledger
                .get(&record.filename)
                .and_then(|r| r.checksum.clone())
            else {
                warn!(uid = %uid, filename = %record.filename, "no ledger checksum; skipping entry");
                continue;
            };
            manifest.push(ManifestEntry {
                uid: uid.clone(),
                build: record.build,
                filename: record.filename.clone(),
                checksum,
            });
        }
        Ok(manifest)
    }
}

/// Root URL of the server hosting a manifest endpoint: everything up to and
/// including the last path `/`. The scheme separator's slashes do not
/// count, so a bare `http://host` roots at `http://host/`.
fn server_root(manifest_url: &str) -> String {
    let path_start = match manifest_url.find("://") {
        Some(idx) => idx + 3,
        None => 0,
    };
    match manifest_url[path_start..].rfind('/') {
        Some(idx) => manifest_url[..path_start + idx + 1].to_string(),
        None if path_start > 0 => format!("{manifest_url}/"),
        None => manifest_url.to_string(),
    }
}
