//! Control directory layout for a repository.
//!
//! Every repository root owns a hidden `.depot/` directory holding the
//! persisted documents (registry, ledger, tags, remotes), a per-uid metadata
//! cache, per-remote cached manifests, and a temp area for in-flight
//! downloads. All document writes go through an atomic temp-file + rename so
//! a crash mid-write can never leave partial JSON behind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the hidden control directory under a repository root.
pub const CONTROL_DIR_NAME: &str = ".depot";

/// Registry document filename (files→uid and uid→record maps).
const REGISTRY_FILE: &str = "registry.json";

/// Per-filename ledger filename.
const LEDGER_FILE: &str = "ledger.json";

/// Tag index filename (uid→tags).
const TAGS_FILE: &str = "tags.json";

/// Remotes document filename (name→descriptor).
const REMOTES_FILE: &str = "remotes.json";

/// Subdirectory holding one metadata blob per uid.
const CACHE_DIR: &str = "cache";

/// Subdirectory holding one cached manifest per remote name.
const MANIFESTS_DIR: &str = "remotes";

/// Subdirectory holding in-flight download temp files.
const TMP_DIR: &str = "tmp";

/// Paths and persistence for a repository's control directory.
#[derive(Debug, Clone)]
pub struct ControlDir {
    root: PathBuf,
}

impl ControlDir {
    /// Opens the control directory under `repo_root`, creating the directory
    /// tree if it does not exist yet.
    pub fn open(repo_root: &Path) -> io::Result<Self> {
        let root = repo_root.join(CONTROL_DIR_NAME);
        std::fs::create_dir_all(root.join(CACHE_DIR))?;
        std::fs::create_dir_all(root.join(MANIFESTS_DIR))?;
        std::fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self { root })
    }

    /// Root of the control directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the registry document.
    pub fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    /// Path of the file ledger document.
    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    /// Path of the tag index document.
    pub fn tags_path(&self) -> PathBuf {
        self.root.join(TAGS_FILE)
    }

    /// Path of the remotes document.
    pub fn remotes_path(&self) -> PathBuf {
        self.root.join(REMOTES_FILE)
    }

    /// Path of the cached metadata blob for `uid`.
    pub fn metadata_path(&self, uid: &str) -> PathBuf {
        self.root.join(CACHE_DIR).join(uid)
    }

    /// Path of the cached manifest for remote `name`.
    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.root.join(MANIFESTS_DIR).join(format!("{name}.json"))
    }

    /// Temp directory for in-flight downloads.
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Temp path for an in-flight download of `uid`.
    pub fn download_tmp_path(&self, uid: &str) -> PathBuf {
        self.tmp_dir().join(format!("{uid}.down"))
    }

    /// Reads a JSON document, returning the type's default when the file
    /// does not exist yet (fresh repository).
    pub fn read_json_or_default<T>(&self, path: &Path) -> io::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e),
        }
    }

    /// Writes a JSON document atomically (temp sibling + rename).
    pub fn write_json<T>(&self, path: &Path, value: &T) -> io::Result<()>
    where
        T: Serialize,
    {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_atomic(path, &bytes)
    }
}

/// Writes `bytes` to `path` via a temp sibling and rename.
///
/// The temp file lives in the same directory as the target so the rename
/// stays on one filesystem.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
