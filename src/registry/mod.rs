//! Package registry: the persisted uid↔file mapping and its mutations.
//!
//! The registry consumes scanner classifications plus engine adapter
//! results and maintains three persisted documents: the registry itself
//! (both directions of the file↔uid mapping), the derived tag index, and a
//! content-addressed metadata cache with one blob per uid. Every mutating
//! operation ends with an atomic persist, and the bidirectional invariant
//! is enforced before any mutation is committed.
//!
//! All mutations run on a single logical writer (see the pipeline module);
//! the registry itself is not a synchronization point.

mod types;

pub use types::{PackageRecord, RegistryDoc, RegistryError, TagIndex};

use crate::engine::{EngineRegistry, PackageSpec};
use crate::layout::ControlDir;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Read-only copy of the registry state handed to callers when a pipeline
/// pass completes (and to the puller for diffing).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub doc: RegistryDoc,
    pub tags: TagIndex,
}

/// One package matched by an opaque predicate query.
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub uid: String,
    pub metadata: Value,
}

/// The mutable package registry for one repository instance.
pub struct PackageRegistry {
    control: ControlDir,
    engines: EngineRegistry,
    repo_root: PathBuf,
    doc: RegistryDoc,
    tags: TagIndex,
}

impl PackageRegistry {
    /// Loads registry state from the control directory.
    pub fn load(
        control: ControlDir,
        engines: EngineRegistry,
        repo_root: PathBuf,
    ) -> Result<Self, RegistryError> {
        let doc: RegistryDoc = control
            .read_json_or_default(&control.registry_path())
            .map_err(|e| io_err("registry.json", e))?;
        let tags: TagIndex = control
            .read_json_or_default(&control.tags_path())
            .map_err(|e| io_err("tags.json", e))?;
        doc.check_consistency()?;
        Ok(Self {
            control,
            engines,
            repo_root,
            doc,
            tags,
        })
    }

    /// Current state as an owned snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            doc: self.doc.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Registers a newly added file.
    ///
    /// Invokes the engine adapter; on success the package record, filename
    /// mapping, tag entry and cached metadata blob are written and the
    /// registry is persisted. An adapter failure leaves the registry
    /// untouched; the file stays untracked and is retried on the next
    /// discovery cycle.
    pub fn register(&mut self, filename: &str) -> Result<(), RegistryError> {
        let spec = self.read_spec(filename)?;

        // A lost ledger replays a rewritten file as added. The filename's
        // prior identity is superseded, not kept alongside.
        if let Some(prior_uid) = self.doc.files.get(filename).cloned() {
            if prior_uid != spec.uid {
                debug!(filename, old = %prior_uid, new = %spec.uid, "stale mapping superseded");
                self.remove_uid(&prior_uid);
            }
        }

        if let Some(existing) = self.doc.packages.get(&spec.uid) {
            if existing.filename != filename {
                return Err(RegistryError::DuplicateUid {
                    uid: spec.uid,
                    existing: existing.filename.clone(),
                    incoming: filename.to_string(),
                });
            }
        }

        self.insert_package(filename, &spec)?;
        info!(filename, uid = %spec.uid, build = spec.build, "package registered");
        Ok(())
    }

    /// Re-reads a changed file.
    ///
    /// When the adapter returns a different uid than the one previously
    /// mapped to this filename, the old uid's record is superseded: its
    /// record, tag entry and metadata blob are removed before the new
    /// identity is inserted.
    pub fn update(&mut self, filename: &str) -> Result<(), RegistryError> {
        let spec = self.read_spec(filename)?;

        if let Some(prior_uid) = self.doc.files.get(filename).cloned() {
            if prior_uid != spec.uid {
                debug!(filename, old = %prior_uid, new = %spec.uid, "identity change");
                self.remove_uid(&prior_uid);
            }
        }

        if let Some(existing) = self.doc.packages.get(&spec.uid) {
            if existing.filename != filename {
                return Err(RegistryError::DuplicateUid {
                    uid: spec.uid,
                    existing: existing.filename.clone(),
                    incoming: filename.to_string(),
                });
            }
        }

        self.insert_package(filename, &spec)?;
        info!(filename, uid = %spec.uid, build = spec.build, "package updated");
        Ok(())
    }

    /// Removes the package owned by `filename`.
    ///
    /// Idempotent: untracking a filename with no registry entry only logs.
    pub fn untrack(&mut self, filename: &str) -> Result<(), RegistryError> {
        let Some(uid) = self.doc.files.get(filename).cloned() else {
            debug!(filename, "untrack: no registry entry");
            return Ok(());
        };

        self.remove_uid(&uid);
        self.persist()?;
        info!(filename, uid = %uid, "package untracked");
        Ok(())
    }

    /// Ensures a stable-on-disk file is actually tracked.
    ///
    /// An unchanged file that is missing from the registry (a failed
    /// earlier registration, or a registry rebuilt from scratch) is
    /// registered now; otherwise this is a no-op.
    pub fn verify_tracked(&mut self, filename: &str) -> Result<(), RegistryError> {
        if self.doc.files.contains_key(filename) {
            return Ok(());
        }
        debug!(filename, "unchanged file not tracked; registering");
        self.register(filename)
    }

    /// Untracks every uid whose owning file is absent from
    /// `current_filenames`.
    ///
    /// Repairs registries that drifted from manual filesystem edits between
    /// runs. Persists once when anything was removed.
    pub fn reconcile_missing(
        &mut self,
        current_filenames: &BTreeSet<String>,
    ) -> Result<usize, RegistryError> {
        let missing: Vec<(String, String)> = self
            .doc
            .packages
            .iter()
            .filter(|(_, record)| !current_filenames.contains(&record.filename))
            .map(|(uid, record)| (uid.clone(), record.filename.clone()))
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        for (uid, filename) in &missing {
            warn!(uid = %uid, filename = %filename, "owning file missing; untracking");
            self.remove_uid(uid);
        }
        self.persist()?;
        Ok(missing.len())
    }

    /// Filters packages through the engine's opaque predicate matcher.
    ///
    /// Metadata comes from the per-uid cache blob; a missing blob is
    /// rebuilt by re-parsing the container and re-cached. Packages whose
    /// container and blob are both unreadable are skipped with a warning
    /// rather than failing the whole query.
    pub fn query(&self, predicate: &str) -> Result<Vec<QueryHit>, RegistryError> {
        let mut hits = Vec::new();

        for (uid, record) in &self.doc.packages {
            let path = self.repo_root.join(&record.filename);
            let engine = match self.engines.resolve(&path) {
                Ok(engine) => engine,
                Err(e) => {
                    warn!(uid = %uid, error = %e, "query: no engine; skipping");
                    continue;
                }
            };

            let metadata = match self.cached_metadata(uid) {
                Some(metadata) => metadata,
                None => match engine.read_metadata(&path) {
                    Ok(spec) => {
                        self.write_metadata_blob(&spec.uid, &spec.metadata)?;
                        spec.metadata
                    }
                    Err(e) => {
                        warn!(uid = %uid, error = %e, "query: unreadable package; skipping");
                        continue;
                    }
                },
            };

            if engine.is_match(&metadata, predicate) {
                hits.push(QueryHit {
                    uid: uid.clone(),
                    metadata,
                });
            }
        }

        Ok(hits)
    }

    /// Cached metadata blob for `uid`, if present and parseable.
    pub fn cached_metadata(&self, uid: &str) -> Option<Value> {
        let bytes = std::fs::read(self.control.metadata_path(uid)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    // Mutation internals. `remove_uid` only touches in-memory state plus the
    // blob; callers persist.

    fn read_spec(&self, filename: &str) -> Result<PackageSpec, RegistryError> {
        let path = self.repo_root.join(filename);
        let engine = self.engines.resolve(&path)?;
        Ok(engine.read_metadata(&path)?)
    }

    fn insert_package(&mut self, filename: &str, spec: &PackageSpec) -> Result<(), RegistryError> {
        // The mutation is staged on a copy so a consistency violation
        // rejects it with the prior state intact.
        let mut candidate = self.doc.clone();
        candidate.packages.insert(
            spec.uid.clone(),
            PackageRecord {
                build: spec.build,
                filename: filename.to_string(),
            },
        );
        candidate.files.insert(filename.to_string(), spec.uid.clone());
        candidate.check_consistency()?;

        self.write_metadata_blob(&spec.uid, &spec.metadata)?;
        self.doc = candidate;

        let path = self.repo_root.join(filename);
        if let Ok(engine) = self.engines.resolve(&path) {
            self.tags.insert(spec.uid.clone(), engine.tags_of(&spec.metadata));
        }

        self.persist()
    }

    fn remove_uid(&mut self, uid: &str) {
        if let Some(record) = self.doc.packages.remove(uid) {
            self.doc.files.remove(&record.filename);
        }
        self.tags.remove(uid);

        let blob = self.control.metadata_path(uid);
        if blob.exists() {
            if let Err(e) = std::fs::remove_file(&blob) {
                warn!(uid = %uid, error = %e, "failed to remove metadata blob");
            }
        }
    }

    fn write_metadata_blob(&self, uid: &str, metadata: &Value) -> Result<(), RegistryError> {
        self.control
            .write_json(&self.control.metadata_path(uid), metadata)
            .map_err(|e| io_err(uid, e))
    }

    fn persist(&self) -> Result<(), RegistryError> {
        self.control
            .write_json(&self.control.registry_path(), &self.doc)
            .map_err(|e| io_err("registry.json", e))?;
        self.control
            .write_json(&self.control.tags_path(), &self.tags)
            .map_err(|e| io_err("tags.json", e))
    }

    /// Whether the metadata blob for `uid` exists on disk.
    pub fn has_metadata_blob(&self, uid: &str) -> bool {
        self.control.metadata_path(uid).exists()
    }
}

fn io_err(context: impl Into<String>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        context: context.into(),
        source,
    }
}

impl std::fmt::Debug for PackageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageRegistry")
            .field("root", &self.repo_root)
            .field("packages", &self.doc.packages.len())
            .field("files", &self.doc.files.len())
            .finish()
    }
}
