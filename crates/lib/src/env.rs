//! Process environment snapshot.
//!
//! The environment is read exactly once, when a [`CraftEnv`] is captured, and
//! every known variable is resolved against its default at that point. After
//! capture the snapshot is immutable and shared by reference with every
//! pipeline component.
//!
//! # Known variables
//!
//! | Variable | Default |
//! |---|---|
//! | `MC_WORK_DIR` | current directory |
//! | `MC_CONFIG` | `$MC_WORK_DIR/.config.yml` |
//! | `MC_BUILD_DIR` | `$MC_WORK_DIR/build` |
//! | `MC_DOWNLOADS_DIR` | `$MC_WORK_DIR/downloads` |
//! | `MC_CACHE_DIR` | `$MC_WORK_DIR/cache` |
//! | `MC_LAYERS_DIR` | `$MC_WORK_DIR/build/layers` |
//! | `MC_MEMORY` | `4G` |
//! | `MC_BASE` | `/home/mc` |
//! | `MC_PORT` | `25565` |
//! | `MC_REPO_URL` | `https://mcpkg.invalid/repo` |
//!
//! `MC_INCLUDE_PRE`, `MC_VERSION`, `SSH_PRIVATE_KEY`, `DOCKER_CONFIG`,
//! `CURSE_FORGE_KEY` and `MODRINTH_TOKEN` have no default.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MC_WORK_DIR: &str = "MC_WORK_DIR";
pub const MC_CONFIG: &str = "MC_CONFIG";
pub const MC_BUILD_DIR: &str = "MC_BUILD_DIR";
pub const MC_DOWNLOADS_DIR: &str = "MC_DOWNLOADS_DIR";
pub const MC_CACHE_DIR: &str = "MC_CACHE_DIR";
pub const MC_LAYERS_DIR: &str = "MC_LAYERS_DIR";
pub const MC_INCLUDE_PRE: &str = "MC_INCLUDE_PRE";
pub const MC_VERSION: &str = "MC_VERSION";
pub const MC_MEMORY: &str = "MC_MEMORY";
pub const MC_BASE: &str = "MC_BASE";
pub const MC_PORT: &str = "MC_PORT";
pub const MC_REPO_URL: &str = "MC_REPO_URL";
pub const SSH_PRIVATE_KEY: &str = "SSH_PRIVATE_KEY";
pub const DOCKER_CONFIG: &str = "DOCKER_CONFIG";
pub const CURSE_FORGE_KEY: &str = "CURSE_FORGE_KEY";
pub const MODRINTH_TOKEN: &str = "MODRINTH_TOKEN";

/// Every variable the snapshot reads from the process environment.
pub const KNOWN_VARS: &[&str] = &[
  MC_WORK_DIR,
  MC_CONFIG,
  MC_BUILD_DIR,
  MC_DOWNLOADS_DIR,
  MC_CACHE_DIR,
  MC_LAYERS_DIR,
  MC_INCLUDE_PRE,
  MC_VERSION,
  MC_MEMORY,
  MC_BASE,
  MC_PORT,
  MC_REPO_URL,
  SSH_PRIVATE_KEY,
  DOCKER_CONFIG,
  CURSE_FORGE_KEY,
  MODRINTH_TOKEN,
];

/// Variables injected into `defaults.env` of the merged configuration.
///
/// Host paths and credentials are never injected: the build environment ends
/// up in the rendered descriptor and therefore in the image.
pub const INJECTED_VARS: &[&str] = &[MC_VERSION, MC_MEMORY, MC_BASE, MC_PORT];

const DEFAULT_REPO_URL: &str = "https://mcpkg.invalid/repo";

/// Immutable snapshot of the known environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CraftEnv {
  vars: BTreeMap<String, String>,
}

impl CraftEnv {
  /// Capture the current process environment.
  pub fn capture() -> Self {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let raw = KNOWN_VARS
      .iter()
      .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)));
    Self::resolve(raw, &cwd)
  }

  /// Build a snapshot from explicit values instead of the process environment.
  ///
  /// Unknown keys are ignored; missing keys fall back to their defaults with
  /// `fallback_work_dir` standing in for the current directory.
  pub fn from_vars<I, K, V>(vars: I, fallback_work_dir: &Path) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let raw = vars
      .into_iter()
      .map(|(k, v)| (k.into(), v.into()))
      .filter(|(k, _)| KNOWN_VARS.contains(&k.as_str()));
    Self::resolve(raw, fallback_work_dir)
  }

  fn resolve(raw: impl Iterator<Item = (String, String)>, cwd: &Path) -> Self {
    let mut vars: BTreeMap<String, String> = raw.filter(|(_, v)| !v.is_empty()).collect();

    let work_dir = vars
      .entry(MC_WORK_DIR.to_string())
      .or_insert_with(|| cwd.display().to_string())
      .clone();
    let work_dir = PathBuf::from(work_dir);

    let derived = [
      (MC_CONFIG, work_dir.join(".config.yml")),
      (MC_BUILD_DIR, work_dir.join("build")),
      (MC_DOWNLOADS_DIR, work_dir.join("downloads")),
      (MC_CACHE_DIR, work_dir.join("cache")),
      (MC_LAYERS_DIR, work_dir.join("build").join("layers")),
    ];
    for (key, path) in derived {
      vars
        .entry(key.to_string())
        .or_insert_with(|| path.display().to_string());
    }

    let fixed = [
      (MC_MEMORY, "4G"),
      (MC_BASE, "/home/mc"),
      (MC_PORT, "25565"),
      (MC_REPO_URL, DEFAULT_REPO_URL),
    ];
    for (key, value) in fixed {
      vars.entry(key.to_string()).or_insert_with(|| value.to_string());
    }

    Self { vars }
  }

  /// Value of a known variable, if it resolved to one.
  pub fn get(&self, key: &str) -> Option<&str> {
    self.vars.get(key).map(String::as_str)
  }

  /// Comma-separated list value; blank items are dropped.
  pub fn get_list(&self, key: &str) -> Vec<String> {
    self
      .get(key)
      .map(|raw| {
        raw
          .split(',')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default()
  }

  fn path(&self, key: &str) -> PathBuf {
    // Every path variable has a derived default, so the lookup cannot miss.
    PathBuf::from(self.get(key).unwrap_or("."))
  }

  pub fn work_dir(&self) -> PathBuf {
    self.path(MC_WORK_DIR)
  }

  pub fn config_path(&self) -> PathBuf {
    self.path(MC_CONFIG)
  }

  pub fn build_dir(&self) -> PathBuf {
    self.path(MC_BUILD_DIR)
  }

  pub fn downloads_dir(&self) -> PathBuf {
    self.path(MC_DOWNLOADS_DIR)
  }

  pub fn cache_dir(&self) -> PathBuf {
    self.path(MC_CACHE_DIR)
  }

  pub fn layers_dir(&self) -> PathBuf {
    self.path(MC_LAYERS_DIR)
  }

  pub fn include_pre(&self) -> Vec<String> {
    self.get_list(MC_INCLUDE_PRE)
  }

  pub fn repo_url(&self) -> &str {
    self.get(MC_REPO_URL).unwrap_or(DEFAULT_REPO_URL)
  }

  /// Values that are injected into `defaults.env` where absent.
  pub fn injectable(&self) -> impl Iterator<Item = (&str, &str)> {
    INJECTED_VARS
      .iter()
      .filter_map(|key| self.get(key).map(|value| (*key, value)))
  }

  /// Render every resolved variable as `KEY: value` lines, secrets masked.
  pub fn dump(&self) -> String {
    self
      .vars
      .iter()
      .map(|(k, v)| {
        if is_secret(k) {
          format!("{}: ********", k)
        } else {
          format!("{}: {}", k, v)
        }
      })
      .collect::<Vec<_>>()
      .join("\n")
  }
}

fn is_secret(key: &str) -> bool {
  matches!(key, CURSE_FORGE_KEY | MODRINTH_TOKEN)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  fn derived_paths_follow_work_dir() {
    let env = CraftEnv::from_vars([(MC_WORK_DIR, "/srv/craft")], Path::new("/unused"));
    assert_eq!(env.build_dir(), PathBuf::from("/srv/craft/build"));
    assert_eq!(env.layers_dir(), PathBuf::from("/srv/craft/build/layers"));
    assert_eq!(env.cache_dir(), PathBuf::from("/srv/craft/cache"));
    assert_eq!(env.downloads_dir(), PathBuf::from("/srv/craft/downloads"));
    assert_eq!(env.config_path(), PathBuf::from("/srv/craft/.config.yml"));
  }

  #[test]
  fn explicit_overrides_win_over_derived() {
    let env = CraftEnv::from_vars(
      [(MC_WORK_DIR, "/srv/craft"), (MC_LAYERS_DIR, "/opt/layers")],
      Path::new("/unused"),
    );
    assert_eq!(env.layers_dir(), PathBuf::from("/opt/layers"));
    assert_eq!(env.build_dir(), PathBuf::from("/srv/craft/build"));
  }

  #[test]
  fn fallback_work_dir_used_when_unset() {
    let env = CraftEnv::from_vars(Vec::<(String, String)>::new(), Path::new("/tmp/wd"));
    assert_eq!(env.work_dir(), PathBuf::from("/tmp/wd"));
    assert_eq!(env.get(MC_MEMORY), Some("4G"));
    assert_eq!(env.get(MC_VERSION), None);
  }

  #[test]
  fn list_values_are_trimmed() {
    let env = CraftEnv::from_vars([(MC_INCLUDE_PRE, " a.yml, ,b.yml ")], Path::new("/"));
    assert_eq!(env.include_pre(), vec!["a.yml", "b.yml"]);
  }

  #[test]
  fn unknown_keys_are_ignored() {
    let env = CraftEnv::from_vars([("HOME", "/root")], Path::new("/"));
    assert_eq!(env.get("HOME"), None);
  }

  #[test]
  fn injectable_excludes_secrets_and_paths() {
    let env = CraftEnv::from_vars(
      [(MC_VERSION, "1.21.6"), (CURSE_FORGE_KEY, "secret")],
      Path::new("/"),
    );
    let injected: Vec<_> = env.injectable().map(|(k, _)| k).collect();
    assert!(injected.contains(&MC_VERSION));
    assert!(!injected.contains(&CURSE_FORGE_KEY));
    assert!(!injected.contains(&MC_BUILD_DIR));
  }

  #[test]
  fn dump_masks_credentials() {
    let env = CraftEnv::from_vars([(CURSE_FORGE_KEY, "secret")], Path::new("/"));
    let dump = env.dump();
    assert!(dump.contains("CURSE_FORGE_KEY: ********"));
    assert!(!dump.contains("secret"));
  }

  #[test]
  #[serial]
  fn capture_reads_process_environment() {
    temp_env::with_vars(
      [(MC_WORK_DIR, Some("/srv/captured")), (MC_VERSION, Some("1.21.7"))],
      || {
        let env = CraftEnv::capture();
        assert_eq!(env.work_dir(), PathBuf::from("/srv/captured"));
        assert_eq!(env.get(MC_VERSION), Some("1.21.7"));
      },
    );
  }
}
