//! Typed views over sections of the merged configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The `defaults` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
  #[serde(default, deserialize_with = "string_map")]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub layers_dir: Option<String>,
  #[serde(default)]
  pub build_dir: Option<String>,
  #[serde(default)]
  pub templates_dir: Option<String>,
}

/// One entry of the `layers` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default, deserialize_with = "opt_scalar")]
  pub branch: Option<String>,
  #[serde(default, deserialize_with = "opt_scalar")]
  pub commit: Option<String>,
  #[serde(default)]
  pub path: Option<String>,
}

/// One entry of the `servers` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
  pub parent_image: String,
  #[serde(default)]
  pub modloader: Option<String>,
  #[serde(default, deserialize_with = "string_map")]
  pub env: BTreeMap<String, String>,
  /// Provider key to the list of raw mod entries declared for it.
  #[serde(default)]
  pub mods: BTreeMap<String, Vec<Value>>,
  #[serde(default)]
  pub plugins: Vec<String>,
  #[serde(default)]
  pub config_files: Vec<String>,
  #[serde(default)]
  pub entry_point: Option<String>,
  #[serde(default)]
  pub network: Option<NetworkSpec>,
  #[serde(default)]
  pub world: Option<WorldSpec>,
  #[serde(default, deserialize_with = "string_map")]
  pub docker_args: BTreeMap<String, String>,
  #[serde(default, deserialize_with = "opt_scalar")]
  pub version: Option<String>,
}

impl ServerSpec {
  /// Fleet defaults overridden key by key by this server's own env.
  pub fn merged_env(&self, defaults: &Defaults) -> BTreeMap<String, String> {
    let mut env = defaults.env.clone();
    env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
  }

  /// Image tag for this server: `<name>:<version or latest>`.
  pub fn tag(&self, name: &str) -> String {
    format!("{}:{}", name, self.version.as_deref().unwrap_or("latest"))
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub subnet: Option<String>,
  #[serde(default)]
  pub gateway: Option<String>,
  #[serde(default)]
  pub ipaddress: Option<String>,
  #[serde(default, deserialize_with = "opt_scalar")]
  pub port: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSpec {
  #[serde(default)]
  pub host: Option<String>,
  #[serde(default)]
  pub file: Option<String>,
}

/// Render a scalar as the string a shell or template would see.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

/// Deserialize a mapping of scalars into strings, dropping null values.
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
  let mut out = BTreeMap::new();
  for (key, value) in raw {
    if value.is_null() {
      continue;
    }
    let rendered = scalar_to_string(&value)
      .ok_or_else(|| serde::de::Error::custom(format!("value of '{}' must be a scalar", key)))?;
    out.insert(key, rendered);
  }
  Ok(out)
}

/// Deserialize an optional scalar as a string (`commit: 1234567` stays a string).
fn opt_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = Option::<Value>::deserialize(deserializer)?;
  match raw {
    None | Some(Value::Null) => Ok(None),
    Some(value) => scalar_to_string(&value)
      .map(Some)
      .ok_or_else(|| serde::de::Error::custom("expected a scalar value")),
  }
}
