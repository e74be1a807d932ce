//! JSON Schema validation of the merged configuration.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::ConfigError;
use crate::consts::{SCHEMA_OVERRIDE_FILENAME, SUPPORTED_CONFIG_VERSIONS};

const BUNDLED_SCHEMA: &str = include_str!("../../schema/craft.schema.json");

/// Compiled schema plus the name of the document it came from.
pub struct SchemaValidator {
  source_name: String,
  validator: jsonschema::Validator,
}

impl std::fmt::Debug for SchemaValidator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SchemaValidator")
      .field("source_name", &self.source_name)
      .finish_non_exhaustive()
  }
}

impl SchemaValidator {
  /// The schema shipped with the crate.
  pub fn bundled() -> Result<Self, ConfigError> {
    let schema: Value = serde_json::from_str(BUNDLED_SCHEMA).map_err(|e| ConfigError::SchemaLoad {
      source_name: "bundled".to_string(),
      message: e.to_string(),
    })?;
    Self::from_value("bundled", &schema)
  }

  /// Load a schema document from disk (JSON, or YAML by extension).
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let source_name = path.display().to_string();
    let load_err = |message: String| ConfigError::SchemaLoad {
      source_name: source_name.clone(),
      message,
    };

    let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
    let schema: Value = match path.extension().and_then(|e| e.to_str()) {
      Some("yml" | "yaml") => serde_yaml::from_str(&content).map_err(|e| load_err(e.to_string()))?,
      _ => serde_json::from_str(&content).map_err(|e| load_err(e.to_string()))?,
    };
    Self::from_value(&source_name, &schema)
  }

  pub fn from_value(source_name: &str, schema: &Value) -> Result<Self, ConfigError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ConfigError::SchemaLoad {
      source_name: source_name.to_string(),
      message: e.to_string(),
    })?;
    Ok(Self {
      source_name: source_name.to_string(),
      validator,
    })
  }

  /// Use a schema override next to `first_root` if one exists, else the bundled one.
  pub fn discover(first_root: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(path) = first_root.and_then(override_path) {
      debug!(path = %path.display(), "using schema override");
      return Self::from_file(&path);
    }
    Self::bundled()
  }

  pub fn source_name(&self) -> &str {
    &self.source_name
  }

  /// Collect every violation; an empty result means the document is valid.
  pub fn violations(&self, instance: &Value) -> Vec<String> {
    self
      .validator
      .iter_errors(instance)
      .map(|e| {
        let location = e.instance_path.to_string();
        if location.is_empty() {
          e.to_string()
        } else {
          format!("{}: {}", location, e)
        }
      })
      .collect()
  }

  pub fn validate(&self, instance: &Value) -> Result<(), ConfigError> {
    let errors = self.violations(instance);
    if errors.is_empty() {
      Ok(())
    } else {
      Err(ConfigError::Schema { errors })
    }
  }
}

fn override_path(first_root: &Path) -> Option<PathBuf> {
  let dir = first_root.parent()?;
  let stem = Path::new(SCHEMA_OVERRIDE_FILENAME)
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or(SCHEMA_OVERRIDE_FILENAME);
  [
    dir.join(SCHEMA_OVERRIDE_FILENAME),
    dir.join(format!("{}.yml", stem)),
  ]
  .into_iter()
  .find(|candidate| candidate.is_file())
}

/// Check the `version` field of a merged mapping.
pub fn check_version(merged: &Value) -> Result<String, ConfigError> {
  let found = match merged.get("version") {
    None | Some(Value::Null) => return Err(ConfigError::MissingVersion),
    Some(Value::String(s)) if s.is_empty() => return Err(ConfigError::MissingVersion),
    Some(Value::String(s)) => s.clone(),
    Some(Value::Number(n)) => n.to_string(),
    Some(other) => other.to_string(),
  };

  if SUPPORTED_CONFIG_VERSIONS.contains(&found.as_str()) {
    Ok(found)
  } else {
    Err(ConfigError::UnsupportedVersion {
      found,
      supported: SUPPORTED_CONFIG_VERSIONS.iter().map(|v| v.to_string()).collect(),
    })
  }
}
