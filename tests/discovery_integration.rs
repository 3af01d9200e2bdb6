//! Integration tests for the discovery flow.
//!
//! These tests drive a full repository handle over a real temp directory:
//! scan, registry mutation, ledger persistence and state survival across
//! handle reopens.
//!
//! Run with: `cargo test --test discovery_integration`

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use depot::engine::{EngineError, EngineRegistry, PackageEngine, PackageSpec};
use depot::repository::{Repository, RepositoryConfig};
use depot::scanner::FileStatus;

// ============================================================================
// Test engine
// ============================================================================

/// Engine for `.pkg` containers: a JSON document carrying `uid`, `build`
/// and optional `tags`.
struct JsonEngine;

impl PackageEngine for JsonEngine {
    fn read_metadata(&self, path: &Path) -> Result<PackageSpec, EngineError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = fs::read(path).map_err(|e| EngineError::Io {
            filename: filename.clone(),
            source: e,
        })?;
        let doc: Value = serde_json::from_slice(&bytes).map_err(|e| EngineError::Corrupt {
            filename: filename.clone(),
            reason: e.to_string(),
        })?;
        let uid = doc["uid"].as_str().ok_or_else(|| EngineError::Corrupt {
            filename,
            reason: "missing uid".to_string(),
        })?;
        Ok(PackageSpec {
            uid: uid.to_string(),
            build: doc["build"].as_u64().unwrap_or(1),
            metadata: doc,
        })
    }

    fn tags_of(&self, metadata: &Value) -> Vec<String> {
        metadata["tags"]
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn is_match(&self, metadata: &Value, predicate: &str) -> bool {
        match predicate.split_once('=') {
            Some((key, want)) => metadata[key].as_str() == Some(want),
            None => false,
        }
    }
}

fn engines() -> EngineRegistry {
    let mut registry = EngineRegistry::new();
    registry.register(["pkg"], Arc::new(JsonEngine));
    registry
}

fn write_pkg(dir: &Path, name: &str, uid: &str, build: u64) {
    fs::write(
        dir.join(name),
        json!({ "uid": uid, "build": build }).to_string(),
    )
    .unwrap();
}

fn open(dir: &Path) -> Repository<depot::remote::ReqwestClient> {
    Repository::open(dir, RepositoryConfig::default(), engines()).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

/// Full lifecycle: bulk add, modify, delete, then a quiet rescan.
#[tokio::test]
async fn test_discovery_lifecycle() {
    let dir = tempfile::TempDir::new().unwrap();
    for i in 0..8 {
        write_pkg(dir.path(), &format!("p{i}.pkg"), &format!("uid-{i}"), 1);
    }

    let repo = open(dir.path());

    // Initial population.
    let report = repo.discover().await.unwrap();
    assert_eq!(report.counts.added, 8);
    assert_eq!(report.pipeline.processed, 8);
    assert_eq!(repo.snapshot().await.doc.packages.len(), 8);

    // Two packages receive a new build, the rest sit still.
    write_pkg(dir.path(), "p0.pkg", "uid-0", 2);
    write_pkg(dir.path(), "p1.pkg", "uid-1", 2);
    let report = repo.discover().await.unwrap();
    assert_eq!(report.counts.changed, 2);
    assert_eq!(report.counts.unchanged, 6);
    let snapshot = repo.snapshot().await;
    assert_eq!(snapshot.doc.packages["uid-0"].build, 2);
    assert_eq!(snapshot.doc.packages["uid-7"].build, 1);

    // Two packages disappear.
    fs::remove_file(dir.path().join("p6.pkg")).unwrap();
    fs::remove_file(dir.path().join("p7.pkg")).unwrap();
    let report = repo.discover().await.unwrap();
    assert_eq!(report.counts.deleted, 2);
    let snapshot = repo.snapshot().await;
    assert_eq!(snapshot.doc.packages.len(), 6);
    assert!(!snapshot.doc.files.contains_key("p6.pkg"));
    // Removal leaves no residue: no tag entry, no cached metadata blob.
    assert!(!snapshot.tags.contains_key("uid-6"));
    assert!(!dir.path().join(".depot/cache/uid-6").exists());

    // Quiet rescan is a no-op.
    let report = repo.discover().await.unwrap();
    assert_eq!(report.counts.added, 0);
    assert_eq!(report.counts.changed, 0);
    assert_eq!(report.counts.deleted, 0);
    assert_eq!(report.counts.unchanged, 6);
}

/// State written by one handle is visible to a fresh handle over the
/// same directory, including change detection against the old ledger.
#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    write_pkg(dir.path(), "a.pkg", "uid-a", 1);
    write_pkg(dir.path(), "b.pkg", "uid-b", 1);

    {
        let repo = open(dir.path());
        repo.discover().await.unwrap();
    }

    write_pkg(dir.path(), "a.pkg", "uid-a", 2);

    let repo = open(dir.path());
    let report = repo.discover().await.unwrap();
    assert_eq!(report.counts.changed, 1);
    assert_eq!(report.counts.unchanged, 1);
    assert_eq!(repo.snapshot().await.doc.packages["uid-a"].build, 2);
}

/// A package whose uid changes in place supersedes the old identity.
#[tokio::test]
async fn test_identity_change_supersedes_old_uid() {
    let dir = tempfile::TempDir::new().unwrap();
    write_pkg(dir.path(), "a.pkg", "uid-old", 1);

    let repo = open(dir.path());
    repo.discover().await.unwrap();

    write_pkg(dir.path(), "a.pkg", "uid-new", 1);
    repo.discover().await.unwrap();

    let snapshot = repo.snapshot().await;
    assert!(!snapshot.doc.packages.contains_key("uid-old"));
    assert_eq!(snapshot.doc.packages["uid-new"].filename, "a.pkg");
    assert_eq!(snapshot.doc.files["a.pkg"], "uid-new");
}

/// Files removed while no handle was open are reconciled away on the
/// next discovery even though the ledger still listed them.
#[tokio::test]
async fn test_reconciles_offline_deletions() {
    let dir = tempfile::TempDir::new().unwrap();
    write_pkg(dir.path(), "a.pkg", "uid-a", 1);
    write_pkg(dir.path(), "b.pkg", "uid-b", 1);

    {
        let repo = open(dir.path());
        repo.discover().await.unwrap();
    }

    fs::remove_file(dir.path().join("b.pkg")).unwrap();

    let repo = open(dir.path());
    let report = repo.discover().await.unwrap();
    // The scan classifies the deletion; either path must leave the
    // registry without uid-b.
    assert!(report.counts.deleted == 1 || report.reconciled == 1);
    assert!(!repo.snapshot().await.doc.packages.contains_key("uid-b"));
}

/// Files outside the engines' extension set never enter the registry.
#[tokio::test]
async fn test_non_package_files_ignored() {
    let dir = tempfile::TempDir::new().unwrap();
    write_pkg(dir.path(), "a.pkg", "uid-a", 1);
    fs::write(dir.path().join("README.txt"), "not a package").unwrap();
    fs::write(dir.path().join("notes"), "also not").unwrap();

    let repo = open(dir.path());
    let report = repo.discover().await.unwrap();
    assert_eq!(report.counts.added, 1);
    assert_eq!(repo.snapshot().await.doc.packages.len(), 1);
}

/// Corrupt containers are dropped without poisoning the rest of the
/// batch or leaving partial registry entries behind.
#[tokio::test]
async fn test_corrupt_container_dropped() {
    let dir = tempfile::TempDir::new().unwrap();
    write_pkg(dir.path(), "good.pkg", "uid-good", 1);
    fs::write(dir.path().join("bad.pkg"), "{ not json").unwrap();

    let repo = open(dir.path());
    let report = repo.discover().await.unwrap();

    assert_eq!(report.pipeline.processed, 1);
    assert_eq!(report.pipeline.dropped, 1);
    // Corrupt metadata is a permanent condition, never retried.
    assert_eq!(report.pipeline.retried, 0);
    let snapshot = repo.snapshot().await;
    assert_eq!(snapshot.doc.packages.len(), 1);
    assert!(snapshot.doc.packages.contains_key("uid-good"));
}

/// Tags flow from the engine into the persisted tag index and queries
/// see package metadata.
#[tokio::test]
async fn test_tags_and_query() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(
        dir.path().join("a.pkg"),
        json!({ "uid": "uid-a", "build": 1, "tags": ["tool"], "flavor": "stable" }).to_string(),
    )
    .unwrap();

    let repo = open(dir.path());
    repo.discover().await.unwrap();

    let snapshot = repo.snapshot().await;
    assert_eq!(snapshot.tags["uid-a"], vec!["tool".to_string()]);

    let hits = repo.query("flavor=stable").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata["flavor"], "stable");
}

/// The persisted ledger uses the documented integer status codes.
#[tokio::test]
async fn test_ledger_status_codes_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    write_pkg(dir.path(), "a.pkg", "uid-a", 1);

    let repo = open(dir.path());
    repo.discover().await.unwrap();

    let raw = fs::read_to_string(dir.path().join(".depot/ledger.json")).unwrap();
    let doc: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["a.pkg"]["status"], i64::from(i8::from(FileStatus::Added)));
    assert!(doc["a.pkg"]["checksum"].is_string());
}
