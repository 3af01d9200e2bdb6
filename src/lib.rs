//! depot - Content-addressable package registry with remote sync
//!
//! This library tracks package container files in a working directory,
//! maintains a registry keyed by content-derived uids, and synchronizes
//! packages from compatible remote repositories over HTTP with checksum
//! verification.
//!
//! # High-Level API
//!
//! For most use cases, the [`repository`] module provides a facade over
//! discovery, registry maintenance and remote sync:
//!
//! ```ignore
//! use depot::engine::EngineRegistry;
//! use depot::repository::{Repository, RepositoryConfig};
//!
//! let mut engines = EngineRegistry::new();
//! engines.register(["pkg"], my_engine);
//!
//! let repo = Repository::open(working_dir, RepositoryConfig::default(), engines)?;
//! let report = repo.discover().await?;
//! ```

pub mod checksum;
pub mod download;
pub mod engine;
pub mod layout;
pub mod logging;
pub mod pipeline;
pub mod pull;
pub mod registry;
pub mod remote;
pub mod repository;
pub mod scanner;

/// Version of the depot library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
