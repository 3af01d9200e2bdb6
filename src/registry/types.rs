//! Persisted registry documents and error types.

use crate::engine::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Persisted record for one package, keyed by uid in the registry document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Integer version counter supplied by the package metadata.
    pub build: u64,
    /// The file currently owning this uid, relative to the repository root.
    pub filename: String,
}

/// The registry document: both directions of the file↔uid mapping.
///
/// Invariant: for every `uid` in `packages`,
/// `files[packages[uid].filename] == uid`, and for every `filename` in
/// `files`, `packages[files[filename]].filename == filename`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDoc {
    /// filename → uid.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// uid → record.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageRecord>,
}

impl RegistryDoc {
    /// Verifies the bidirectional mapping invariant.
    pub fn check_consistency(&self) -> Result<(), RegistryError> {
        for (uid, record) in &self.packages {
            match self.files.get(&record.filename) {
                Some(mapped) if mapped == uid => {}
                _ => {
                    return Err(RegistryError::Inconsistent {
                        uid: uid.clone(),
                        filename: record.filename.clone(),
                    })
                }
            }
        }
        for (filename, uid) in &self.files {
            match self.packages.get(uid) {
                Some(record) if record.filename == *filename => {}
                _ => {
                    return Err(RegistryError::Inconsistent {
                        uid: uid.clone(),
                        filename: filename.clone(),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Derived tag index: uid → tags.
pub type TagIndex = BTreeMap<String, Vec<String>>;

/// Errors raised by registry mutations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The engine adapter could not parse the package container.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Reading or persisting registry state failed.
    #[error("registry I/O failure for `{context}`: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Two distinct files resolved to the same uid. The offending mutation
    /// is rejected and prior state kept.
    #[error("uid `{uid}` already owned by `{existing}`, rejected for `{incoming}`")]
    DuplicateUid {
        uid: String,
        existing: String,
        incoming: String,
    },

    /// The bidirectional file↔uid invariant does not hold.
    #[error("registry inconsistency at uid `{uid}` / file `{filename}`")]
    Inconsistent { uid: String, filename: String },
}

impl RegistryError {
    /// Whether the pipeline should re-enqueue the item with backoff.
    ///
    /// Corrupt containers and consistency violations don't heal on a timer;
    /// they are dropped and picked up again on the next full discovery
    /// cycle (or fixed out-of-band). I/O failures are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Io { .. } => true,
            RegistryError::Engine(EngineError::Io { .. }) => true,
            RegistryError::Engine(_) => false,
            RegistryError::DuplicateUid { .. } => false,
            RegistryError::Inconsistent { .. } => false,
        }
    }
}
