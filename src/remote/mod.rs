//! Remote peers: descriptors, manifests, and the fetcher.
//!
//! A remote is a named URL pointing either at another repository served
//! over HTTP or at a sibling repository on the local filesystem. Fetching
//! a remote refreshes its cached manifest; pulling (see the `pull` module)
//! diffs that manifest against the local registry and downloads what's
//! missing or newer.

mod fetcher;
mod http;
mod manifest;

pub use fetcher::{FetchError, Fetcher};
pub use http::{HttpBody, HttpClient, HttpError, ReqwestClient, DEFAULT_HTTP_TIMEOUT};
pub use manifest::{ManifestEntry, RemoteManifest};

use crate::layout::ControlDir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Repository type string a compatible peer must self-identify with.
pub const REPOSITORY_TYPE: &str = "depot";

/// Root info document served by a compatible repository at `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootInfo {
    /// Repository type; must equal [`REPOSITORY_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Peer software version, informational.
    pub version: String,
}

/// A named remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub name: String,
    pub url: String,
}

impl RemoteDescriptor {
    /// Whether this remote is reached over HTTP(S) rather than a local
    /// path.
    pub fn is_http(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }
}

/// Persisted shape of one remotes entry (`remotes.json` values).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoteEntry {
    url: String,
}

/// Errors managing the remotes document.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote `{name}` already exists")]
    Exists { name: String },

    #[error("unknown remote `{name}`")]
    Unknown { name: String },

    #[error("failed to persist remotes: {0}")]
    Io(#[from] std::io::Error),
}

/// The persisted set of configured remotes for one repository.
#[derive(Debug)]
pub struct Remotes {
    control: ControlDir,
    doc: BTreeMap<String, RemoteEntry>,
}

impl Remotes {
    /// Loads the remotes document from the control directory.
    pub fn load(control: ControlDir) -> Result<Self, RemoteError> {
        let doc = control.read_json_or_default(&control.remotes_path())?;
        Ok(Self { control, doc })
    }

    /// Adds a remote. Fails if the name is already taken.
    pub fn add(&mut self, descriptor: RemoteDescriptor) -> Result<(), RemoteError> {
        if self.doc.contains_key(&descriptor.name) {
            return Err(RemoteError::Exists {
                name: descriptor.name,
            });
        }
        self.doc
            .insert(descriptor.name.clone(), RemoteEntry { url: descriptor.url });
        self.persist()?;
        info!(name = %descriptor.name, "remote added");
        Ok(())
    }

    /// Removes a remote by name, along with its cached manifest.
    pub fn remove(&mut self, name: &str) -> Result<(), RemoteError> {
        if self.doc.remove(name).is_none() {
            return Err(RemoteError::Unknown {
                name: name.to_string(),
            });
        }
        self.persist()?;

        let manifest = self.control.manifest_path(name);
        if manifest.exists() {
            if let Err(e) = std::fs::remove_file(&manifest) {
                warn!(name, error = %e, "failed to remove cached manifest");
            }
        }
        info!(name, "remote removed");
        Ok(())
    }

    /// Looks up one remote.
    pub fn get(&self, name: &str) -> Option<RemoteDescriptor> {
        self.doc.get(name).map(|entry| RemoteDescriptor {
            name: name.to_string(),
            url: entry.url.clone(),
        })
    }

    /// All configured remotes in name order.
    pub fn list(&self) -> Vec<RemoteDescriptor> {
        self.doc
            .iter()
            .map(|(name, entry)| RemoteDescriptor {
                name: name.clone(),
                url: entry.url.clone(),
            })
            .collect()
    }

    fn persist(&self) -> Result<(), RemoteError> {
        self.control
            .write_json(&self.control.remotes_path(), &self.doc)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor(name: &str, url: &str) -> RemoteDescriptor {
        RemoteDescriptor {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_add_list_remove_round_trip() {
        let dir = TempDir::new().unwrap();
        let control = ControlDir::open(dir.path()).unwrap();
        let mut remotes = Remotes::load(control.clone()).unwrap();

        remotes
            .add(descriptor("origin", "http://host:3220/main"))
            .unwrap();
        assert_eq!(remotes.list().len(), 1);

        // Persisted: a fresh load sees it.
        let reloaded = Remotes::load(control).unwrap();
        assert_eq!(
            reloaded.get("origin").unwrap().url,
            "http://host:3220/main"
        );

        remotes.remove("origin").unwrap();
        assert!(remotes.list().is_empty());
    }

    #[test]
    fn test_duplicate_add_fails() {
        let dir = TempDir::new().unwrap();
        let control = ControlDir::open(dir.path()).unwrap();
        let mut remotes = Remotes::load(control).unwrap();

        remotes.add(descriptor("origin", "http://a/main")).unwrap();
        let err = remotes.add(descriptor("origin", "http://b/main")).unwrap_err();
        assert!(matches!(err, RemoteError::Exists { .. }));
    }

    #[test]
    fn test_remove_unknown_fails() {
        let dir = TempDir::new().unwrap();
        let control = ControlDir::open(dir.path()).unwrap();
        let mut remotes = Remotes::load(control).unwrap();

        let err = remotes.remove("nope").unwrap_err();
        assert!(matches!(err, RemoteError::Unknown { .. }));
    }

    #[test]
    fn test_http_detection() {
        assert!(descriptor("a", "http://x/main").is_http());
        assert!(descriptor("a", "https://x/main").is_http());
        assert!(!descriptor("a", "/var/repos/other").is_http());
    }
}
