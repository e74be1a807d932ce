//! Mod resolution.
//!
//! Servers declare mods per provider:
//!
//! ```yaml
//! mods:
//!   modrinth:
//!     - fabric-api
//!     - lithium: { version: "mc1.21.6-0.17.0" }
//!   hangar:
//!     - https://hangarcdn.papermc.io/plugins/x/y/Plugin.jar
//! ```
//!
//! Each entry is parsed by its provider into a [`ModRequest`], matched against
//! the provider's catalog for the server's loader and target version, and
//! downloaded below `MC_DOWNLOADS_DIR/<provider>/<loader>/<version>/`.

pub mod download;
pub mod package;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod registry;
pub mod resolver;

use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;

pub use download::Downloader;
pub use package::{PackagedGroup, package_group};
pub use provider::{
  CandidateSummary, CatalogEntry, FetchTarget, ModProvider, ModRequest, ProviderContext, ResolvedModArtifact,
  select_first,
};
pub use rate_limit::RateLimiter;
pub use registry::ProviderRegistry;
pub use resolver::{ModFailure, ModKey, ModReport, ModResolver, ResolveOptions};

#[derive(Debug, Error)]
pub enum ModError {
  #[error("unknown provider '{0}'")]
  UnknownProvider(String),

  #[error("invalid {provider} declaration {entry}: {message}")]
  InvalidDeclaration {
    provider: String,
    entry: String,
    message: String,
  },

  #[error("server '{server}' declares mods but has no modloader")]
  MissingLoader { server: String },

  #[error("server '{server}' has no target version (set MC_VERSION)")]
  MissingTargetVersion { server: String },

  #[error("{provider} has no project '{slug}'")]
  NotFound { provider: String, slug: String },

  #[error("no version of '{slug}'{} supports {loader} {target_version}", .version.as_deref().map(|v| format!(" matching '{}'", v)).unwrap_or_default())]
  NoMatch {
    slug: String,
    version: Option<String>,
    loader: String,
    target_version: String,
  },

  #[error("endpoint '{0}' cannot take a path")]
  InvalidEndpoint(String),

  #[error("{provider} requires {var} to be set")]
  MissingCredential { provider: String, var: String },

  #[error("request to '{url}' failed: {source}")]
  Http {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("'{url}' returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("unexpected response from '{url}': {message}")]
  Decode { url: String, message: String },

  #[error("integrity check failed for '{path}': expected {expected}, found {actual}")]
  Integrity {
    path: PathBuf,
    expected: String,
    actual: String,
  },

  #[error("artifact file '{0}' is missing")]
  MissingFile(PathBuf),

  #[error("I/O error on '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to write package '{path}': {message}")]
  Package { path: PathBuf, message: String },

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("failed to derive cache key: {0}")]
  Key(#[from] serde_json::Error),

  #[error("resolution cancelled")]
  Cancelled,

  #[error("resolution task failed: {0}")]
  Task(String),
}

impl ModError {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ModError {
    let path = path.into();
    move |source| ModError::Io { path, source }
  }
}
