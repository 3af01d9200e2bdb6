//! Engine adapter seam for package container formats.
//!
//! The repository never parses package containers itself. A
//! [`PackageEngine`] knows how to open one container format (a zip-like
//! archive carrying a metadata document) and produce its metadata plus a
//! content-derived uid. Engines are registered per file extension in an
//! [`EngineRegistry`] and resolved when a file is processed; built-in and
//! third-party engines implement the same trait.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors an engine can report while reading a package container.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The container could not be parsed (corrupt archive, missing or
    /// malformed metadata document).
    #[error("package `{filename}` is corrupted: {reason}")]
    Corrupt { filename: String, reason: String },

    /// The file could not be read at all.
    #[error("failed to read `{filename}`: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// No engine is registered for the file's extension.
    #[error("no engine registered for `{filename}`")]
    NoEngine { filename: String },
}

/// Parsed identity and metadata of a single package container.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    /// Content-derived identity. Opaque, stable, printable; safe as a
    /// filename and as a JSON object key.
    pub uid: String,
    /// Integer version counter from the package metadata. Defaults to 1
    /// when the metadata carries none.
    pub build: u64,
    /// The package's metadata document, cached by the registry keyed by uid.
    pub metadata: Value,
}

/// Adapter for one package container format.
///
/// `read_metadata` is the only required operation. Tag extraction and
/// predicate matching are optional capabilities with inert defaults.
pub trait PackageEngine: Send + Sync {
    /// Parses the container at `path` into its uid, build and metadata.
    fn read_metadata(&self, path: &Path) -> Result<PackageSpec, EngineError>;

    /// Derives the tag list for a package from its metadata document.
    fn tags_of(&self, _metadata: &Value) -> Vec<String> {
        Vec::new()
    }

    /// Evaluates an opaque predicate against a package's metadata.
    ///
    /// The predicate language is owned by the caller; engines that don't
    /// support matching reject everything.
    fn is_match(&self, _metadata: &Value, _predicate: &str) -> bool {
        false
    }
}

/// Filename filter derived from the registered engine extensions.
///
/// Matches plain filenames (no path separators) whose extension, compared
/// case-insensitively, belongs to the set.
#[derive(Debug, Clone, Default)]
pub struct FilePattern {
    extensions: Vec<String>,
}

impl FilePattern {
    /// Builds a pattern matching the given extensions (without dots).
    pub fn for_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Pattern matching every filename.
    pub fn any() -> Self {
        Self::default()
    }

    /// Whether `filename` matches this pattern.
    pub fn matches(&self, filename: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        match filename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}

/// Registry of engines keyed by file extension.
///
/// Replaces dynamic plugin loading: adapters are handed in explicitly at
/// repository construction and resolved by the extension of each file.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn PackageEngine>>,
}

impl EngineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `engine` for each extension in `extensions` (without dots).
    ///
    /// A later registration for the same extension replaces the earlier one.
    pub fn register<I, S>(&mut self, extensions: I, engine: Arc<dyn PackageEngine>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for ext in extensions {
            self.engines
                .insert(ext.into().to_ascii_lowercase(), Arc::clone(&engine));
        }
    }

    /// Resolves the engine for `path` by its extension.
    pub fn resolve(&self, path: &Path) -> Result<Arc<dyn PackageEngine>, EngineError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.engines.get(&e.to_ascii_lowercase()))
            .cloned()
            .ok_or(EngineError::NoEngine { filename })
    }

    /// Filename pattern covering every registered extension.
    pub fn file_pattern(&self) -> FilePattern {
        FilePattern::for_extensions(self.engines.keys().cloned())
    }

    /// Whether any engine is registered.
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("extensions", &self.engines.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubEngine;

    impl PackageEngine for StubEngine {
        fn read_metadata(&self, path: &Path) -> Result<PackageSpec, EngineError> {
            Ok(PackageSpec {
                uid: format!("uid-{}", path.display()),
                build: 1,
                metadata: json!({}),
            })
        }
    }

    #[test]
    fn test_resolve_by_extension_case_insensitive() {
        let mut reg = EngineRegistry::new();
        reg.register(["zip"], Arc::new(StubEngine));

        assert!(reg.resolve(Path::new("a.zip")).is_ok());
        assert!(reg.resolve(Path::new("a.ZIP")).is_ok());
        assert!(matches!(
            reg.resolve(Path::new("a.tar")),
            Err(EngineError::NoEngine { .. })
        ));
    }

    #[test]
    fn test_pattern_from_registry() {
        let mut reg = EngineRegistry::new();
        reg.register(["zip", "rar"], Arc::new(StubEngine));
        let pattern = reg.file_pattern();

        assert!(pattern.matches("pkg.zip"));
        assert!(pattern.matches("pkg.RAR"));
        assert!(!pattern.matches("pkg.txt"));
        assert!(!pattern.matches("pkg"));
        assert!(!pattern.matches(".zip"));
    }

    #[test]
    fn test_any_pattern_matches_everything() {
        let pattern = FilePattern::any();
        assert!(pattern.matches("whatever"));
        assert!(pattern.matches("a.bin"));
    }

    #[test]
    fn test_default_capabilities_are_inert() {
        let engine = StubEngine;
        assert!(engine.tags_of(&json!({"tags": "a b"})).is_empty());
        assert!(!engine.is_match(&json!({}), "area = x"));
    }
}
