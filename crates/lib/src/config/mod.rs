//! Configuration resolution.
//!
//! This module handles:
//! - Loading YAML/JSON documents and following their `includes`
//! - Deep-merging documents in queue order (later documents win)
//! - Validating the `version` field and the merged structure
//! - Injecting environment-derived defaults where keys are absent
//!
//! The result is a [`MergedConfig`], which is immutable once built.

pub mod load;
pub mod merge;
pub mod schema;
pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::env::CraftEnv;
use crate::util::fs::expand_path;

pub use load::ConfigResolver;
pub use merge::deep_merge;
pub use schema::SchemaValidator;
pub use types::{Defaults, LayerSpec, NetworkSpec, ServerSpec, WorldSpec};

/// Errors that abort a run before any side effects.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config '{path}': {message}")]
  Parse { path: PathBuf, message: String },

  #[error("config '{path}' must contain a mapping at the top level")]
  NotAMapping { path: PathBuf },

  #[error("invalid 'includes' in '{path}': expected a list of paths")]
  InvalidIncludes { path: PathBuf },

  #[error("missing required 'version' field in configuration")]
  MissingVersion,

  #[error("unsupported config version '{found}' (supported: {})", .supported.join(", "))]
  UnsupportedVersion { found: String, supported: Vec<String> },

  #[error("failed to load schema '{source_name}': {message}")]
  SchemaLoad { source_name: String, message: String },

  #[error("schema validation failed:\n  {}", .errors.join("\n  "))]
  Schema { errors: Vec<String> },

  #[error("invalid '{section}' section: {message}")]
  Invalid { section: String, message: String },

  #[error("layers '{first}' and '{second}' both resolve to '{path}'")]
  LayerPathCollision {
    path: PathBuf,
    first: String,
    second: String,
  },

  #[error("layer '{layer}' path '{path}' escapes the layers directory")]
  LayerPathEscapes { layer: String, path: String },

  #[error("failed to render config: {0}")]
  Dump(String),
}

/// Output format of [`MergedConfig::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpFormat {
  #[default]
  Yaml,
  Json,
}

/// The single merged configuration of a run.
#[derive(Debug, Clone)]
pub struct MergedConfig {
  value: Value,
  sources: Vec<PathBuf>,
  defaults: Defaults,
  servers: BTreeMap<String, ServerSpec>,
  layers: BTreeMap<String, LayerSpec>,
}

impl MergedConfig {
  /// Build typed views over an already merged and validated value.
  pub fn from_value(value: Value, sources: Vec<PathBuf>) -> Result<Self, ConfigError> {
    let defaults = section(&value, "defaults")?;
    let servers = section(&value, "servers")?;
    let layers = section(&value, "layers")?;
    Ok(Self {
      value,
      sources,
      defaults,
      servers,
      layers,
    })
  }

  /// The raw merged mapping.
  pub fn value(&self) -> &Value {
    &self.value
  }

  /// Documents merged into this configuration, in processing order.
  pub fn sources(&self) -> &[PathBuf] {
    &self.sources
  }

  /// Look up a dotted path such as `defaults.env.MC_VERSION`.
  pub fn get(&self, dotted: &str) -> Option<&Value> {
    let segments: Vec<&str> = dotted.split('.').collect();
    self.get_path(&segments)
  }

  /// Look up a path given as segments; use this when a key contains dots.
  pub fn get_path(&self, segments: &[&str]) -> Option<&Value> {
    segments
      .iter()
      .try_fold(&self.value, |current, segment| current.as_object()?.get(*segment))
  }

  pub fn get_str(&self, dotted: &str) -> Option<&str> {
    self.get(dotted).and_then(Value::as_str)
  }

  pub fn version(&self) -> Option<String> {
    self.value.get("version").and_then(types::scalar_to_string)
  }

  pub fn defaults(&self) -> &Defaults {
    &self.defaults
  }

  pub fn servers(&self) -> &BTreeMap<String, ServerSpec> {
    &self.servers
  }

  pub fn server(&self, name: &str) -> Option<&ServerSpec> {
    self.servers.get(name)
  }

  pub fn layers(&self) -> &BTreeMap<String, LayerSpec> {
    &self.layers
  }

  /// Root directory for per-target build directories.
  pub fn build_dir(&self, env: &CraftEnv) -> PathBuf {
    self.dir_setting(self.defaults.build_dir.as_deref(), env, env.build_dir())
  }

  /// Root directory for layer checkouts.
  pub fn layers_dir(&self, env: &CraftEnv) -> PathBuf {
    self.dir_setting(self.defaults.layers_dir.as_deref(), env, env.layers_dir())
  }

  pub fn templates_dir(&self, env: &CraftEnv) -> Option<PathBuf> {
    self
      .defaults
      .templates_dir
      .as_deref()
      .map(|raw| expand_path(raw, &env.work_dir()))
  }

  fn dir_setting(&self, configured: Option<&str>, env: &CraftEnv, fallback: PathBuf) -> PathBuf {
    configured
      .map(|raw| expand_path(raw, &env.work_dir()))
      .unwrap_or(fallback)
  }

  /// Resolve a path declared in the configuration against the work directory.
  pub fn resolve_path(&self, raw: &str, env: &CraftEnv) -> PathBuf {
    expand_path(raw, &env.work_dir())
  }

  pub fn dump(&self, format: DumpFormat) -> Result<String, ConfigError> {
    match format {
      DumpFormat::Yaml => serde_yaml::to_string(&self.value).map_err(|e| ConfigError::Dump(e.to_string())),
      DumpFormat::Json => serde_json::to_string_pretty(&self.value).map_err(|e| ConfigError::Dump(e.to_string())),
    }
  }
}

fn section<T: DeserializeOwned + Default>(value: &Value, name: &str) -> Result<T, ConfigError> {
  match value.get(name) {
    None | Some(Value::Null) => Ok(T::default()),
    Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| ConfigError::Invalid {
      section: name.to_string(),
      message: e.to_string(),
    }),
  }
}

/// Target path of every layer, keyed by layer name.
///
/// Fails when a custom path escapes `root` or two layers share a path.
pub fn layer_paths(layers: &BTreeMap<String, LayerSpec>, root: &Path) -> Result<BTreeMap<String, PathBuf>, ConfigError> {
  let mut by_path: BTreeMap<PathBuf, String> = BTreeMap::new();
  let mut out = BTreeMap::new();

  for (name, layer) in layers {
    let rel = layer.path.as_deref().unwrap_or(name);
    if !crate::util::fs::is_contained(Path::new(rel)) || rel.is_empty() {
      return Err(ConfigError::LayerPathEscapes {
        layer: name.clone(),
        path: rel.to_string(),
      });
    }
    let path = root.join(rel);
    if let Some(first) = by_path.insert(path.clone(), name.clone()) {
      return Err(ConfigError::LayerPathCollision {
        path,
        first,
        second: name.clone(),
      });
    }
    out.insert(name.clone(), path);
  }

  Ok(out)
}
