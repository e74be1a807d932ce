//! Include-driven loading of configuration documents.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::schema::{SchemaValidator, check_version};
use super::{ConfigError, MergedConfig, deep_merge, layer_paths};
use crate::env::CraftEnv;
use crate::util::fs::expand_path;

/// Resolves root documents, pre-includes and nested includes into one
/// [`MergedConfig`].
#[derive(Debug)]
pub struct ConfigResolver<'a> {
  env: &'a CraftEnv,
  roots: Vec<PathBuf>,
  schema: Option<SchemaValidator>,
}

impl<'a> ConfigResolver<'a> {
  /// Create a resolver for `roots`. Relative roots resolve against the work directory.
  pub fn new(env: &'a CraftEnv, roots: impl IntoIterator<Item = PathBuf>) -> Self {
    let work_dir = env.work_dir();
    let roots = roots
      .into_iter()
      .map(|p| expand_path(&p.to_string_lossy(), &work_dir))
      .collect();
    Self {
      env,
      roots,
      schema: None,
    }
  }

  /// Resolver for the default root, `MC_CONFIG`.
  pub fn from_env(env: &'a CraftEnv) -> Self {
    Self::new(env, [env.config_path()])
  }

  /// Validate with `schema` instead of discovering one.
  pub fn with_schema(mut self, schema: SchemaValidator) -> Self {
    self.schema = Some(schema);
    self
  }

  /// Load, merge, validate and inject defaults.
  ///
  /// Nothing outside the configuration documents is touched; every failure
  /// here happens before any layer, mod, or build work starts.
  pub fn resolve(self) -> Result<MergedConfig, ConfigError> {
    let (mut merged, sources) = self.load_all()?;

    let version = check_version(&merged)?;
    debug!(version = %version, "config version accepted");

    let schema = match self.schema {
      Some(schema) => schema,
      None => SchemaValidator::discover(self.roots.first().map(PathBuf::as_path))?,
    };
    schema.validate(&merged)?;

    inject_defaults(&mut merged, self.env);
    let config = MergedConfig::from_value(merged, sources)?;
    layer_paths(config.layers(), &config.layers_dir(self.env))?;

    info!(
      documents = config.sources().len(),
      servers = config.servers().len(),
      layers = config.layers().len(),
      "configuration resolved"
    );
    Ok(config)
  }

  /// Drain the work queue, returning the merged value and processed documents.
  fn load_all(&self) -> Result<(Value, Vec<PathBuf>), ConfigError> {
    let work_dir = self.env.work_dir();
    let mut queue: VecDeque<PathBuf> = self
      .env
      .include_pre()
      .iter()
      .map(|raw| expand_path(raw, &work_dir))
      .chain(self.roots.iter().cloned())
      .collect();

    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut sources = Vec::new();
    let mut merged = Value::Object(Map::new());

    while let Some(raw) = queue.pop_front() {
      let path = canonical(&raw);
      if !visited.insert(path.clone()) {
        debug!(path = %path.display(), "already loaded");
        continue;
      }
      if !path.is_file() {
        warn!(path = %path.display(), "skipping missing config document");
        continue;
      }

      debug!(path = %path.display(), "loading config document");
      let document = read_document(&path)?;
      let includes = includes_of(&document, &path)?;
      merged = deep_merge(&merged, &document);
      sources.push(path);
      queue.extend(includes);
    }

    Ok((merged, sources))
  }
}

fn canonical(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Parse one document by extension. Empty documents are empty mappings.
pub fn read_document(path: &Path) -> Result<Value, ConfigError> {
  let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let parse_err = |message: String| ConfigError::Parse {
    path: path.to_path_buf(),
    message,
  };

  let value: Value = if path.extension().and_then(|e| e.to_str()) == Some("json") {
    if content.trim().is_empty() {
      Value::Null
    } else {
      serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?
    }
  } else {
    serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?
  };

  match value {
    Value::Null => Ok(Value::Object(Map::new())),
    Value::Object(_) => Ok(value),
    _ => Err(ConfigError::NotAMapping {
      path: path.to_path_buf(),
    }),
  }
}

/// Include paths of a document, resolved against the document's directory.
fn includes_of(document: &Value, path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
  let base = path.parent().unwrap_or(Path::new("/"));
  let invalid = || ConfigError::InvalidIncludes {
    path: path.to_path_buf(),
  };

  match document.get("includes") {
    None | Some(Value::Null) => Ok(Vec::new()),
    Some(Value::Array(items)) => items
      .iter()
      .map(|item| item.as_str().map(|raw| expand_path(raw, base)).ok_or_else(invalid))
      .collect(),
    Some(_) => Err(invalid()),
  }
}

/// Fill environment-derived values that the documents did not set.
fn inject_defaults(merged: &mut Value, env: &CraftEnv) {
  let Some(root) = merged.as_object_mut() else {
    return;
  };
  let defaults = root
    .entry("defaults")
    .or_insert_with(|| Value::Object(Map::new()));
  if !defaults.is_object() {
    *defaults = Value::Object(Map::new());
  }
  let Some(defaults) = defaults.as_object_mut() else {
    return;
  };

  let env_map = defaults
    .entry("env")
    .or_insert_with(|| Value::Object(Map::new()));
  if !env_map.is_object() {
    *env_map = Value::Object(Map::new());
  }
  if let Some(env_map) = env_map.as_object_mut() {
    for (key, value) in env.injectable() {
      env_map
        .entry(key.to_string())
        .or_insert_with(|| Value::String(value.to_string()));
    }
  }

  defaults
    .entry("build_dir")
    .or_insert_with(|| Value::String(env.build_dir().display().to_string()));
  defaults
    .entry("layers_dir")
    .or_insert_with(|| Value::String(env.layers_dir().display().to_string()));
}
