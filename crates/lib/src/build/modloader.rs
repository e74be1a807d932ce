//! Modloaders: how a server jar is fetched and installed inside the image.
//!
//! Each loader carries a table of supported target versions. The commands it
//! returns are complete `RUN` instructions for the descriptor.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::BuildAssemblyError;

/// Directory inside the image that holds the server.
pub const SERVER_DIR: &str = "/home/mc";
/// Path of the fetched server or installer jar inside the image.
pub const SERVER_JAR: &str = "/home/mc/server.jar";

pub trait Modloader: Send + Sync {
  fn name(&self) -> &'static str;

  /// Target versions this loader knows how to fetch.
  fn supported_versions(&self) -> Vec<&'static str>;

  fn fetch_command(&self, target_version: &str) -> Result<String, BuildAssemblyError>;

  fn install_command(&self, target_version: &str) -> Result<String, BuildAssemblyError>;
}

fn lookup<'a, T>(
  loader: &str,
  table: &'a [(&'static str, T)],
  target_version: &str,
) -> Result<&'a T, BuildAssemblyError> {
  table
    .iter()
    .find(|(version, _)| *version == target_version)
    .map(|(_, value)| value)
    .ok_or_else(|| BuildAssemblyError::UnsupportedVersion {
      loader: loader.to_string(),
      version: target_version.to_string(),
      supported: table.iter().map(|(v, _)| v.to_string()).collect(),
    })
}

fn versions<T>(table: &[(&'static str, T)]) -> Vec<&'static str> {
  table.iter().map(|(v, _)| *v).collect()
}

/// `(installer, loader)` versions per target version.
const FABRIC: &[(&str, (&str, &str))] = &[
  ("1.21.8", ("1.1.0", "0.16.14")),
  ("1.21.7", ("1.1.0", "0.16.14")),
  ("1.21.6", ("1.1.0", "0.16.14")),
];

const FORGE: &[(&str, &str)] = &[(
  "1.21.6",
  "https://maven.minecraftforge.net/net/minecraftforge/forge/1.21.6-56.0.9/forge-1.21.6-56.0.9-installer.jar",
)];

const NEOFORGE: &[(&str, &str)] = &[(
  "1.21.6",
  "https://maven.neoforged.net/releases/net/neoforged/neoforge/21.6.20-beta/neoforge-21.6.20-beta-installer.jar",
)];

const PAPER: &[(&str, &str)] = &[(
  "1.21.6",
  "https://fill-data.papermc.io/v1/objects/35e2dfa66b3491b9d2f0bb033679fa5aca1e1fdf097e7a06a80ce8afeda5c214/paper-1.21.6-48.jar",
)];

const VELOCITY: &[(&str, &str)] = &[(
  "1.21.6",
  "https://fill-data.papermc.io/v1/objects/f82780ce33035ebe3d6ea7981f0e6e8a3e41a64f2080ef5c0f1266fada03cbee/velocity-3.4.0-SNAPSHOT-522.jar",
)];

/// The Fabric server launcher, downloaded from the Fabric meta service.
#[derive(Debug, Default)]
pub struct Fabric;

impl Modloader for Fabric {
  fn name(&self) -> &'static str {
    "fabric"
  }

  fn supported_versions(&self) -> Vec<&'static str> {
    versions(FABRIC)
  }

  fn fetch_command(&self, target_version: &str) -> Result<String, BuildAssemblyError> {
    let (installer, loader) = lookup(self.name(), FABRIC, target_version)?;
    Ok(format!(
      "RUN wget https://meta.fabricmc.net/v2/versions/loader/{}/{}/{}/server/jar -O {}",
      target_version, loader, installer, SERVER_JAR
    ))
  }

  fn install_command(&self, target_version: &str) -> Result<String, BuildAssemblyError> {
    let (_, loader) = lookup(self.name(), FABRIC, target_version)?;
    Ok(format!(
      "RUN cd {} && java -jar {} server -mcversion {} -loader {} -downloadMinecraft",
      SERVER_DIR, SERVER_JAR, target_version, loader
    ))
  }
}

/// Loaders that download one jar per version and run it with fixed arguments.
#[derive(Debug)]
pub struct JarLoader {
  name: &'static str,
  table: &'static [(&'static str, &'static str)],
  install: &'static str,
}

impl JarLoader {
  pub fn forge() -> Self {
    Self {
      name: "forge",
      table: FORGE,
      install: "--installServer",
    }
  }

  pub fn neoforge() -> Self {
    Self {
      name: "neoforge",
      table: NEOFORGE,
      install: "--installServer",
    }
  }

  pub fn paper() -> Self {
    Self {
      name: "paper",
      table: PAPER,
      install: "--initSettings",
    }
  }
}

impl Modloader for JarLoader {
  fn name(&self) -> &'static str {
    self.name
  }

  fn supported_versions(&self) -> Vec<&'static str> {
    versions(self.table)
  }

  fn fetch_command(&self, target_version: &str) -> Result<String, BuildAssemblyError> {
    let url = lookup(self.name, self.table, target_version)?;
    Ok(format!("RUN cd {} && wget {} -O {}", SERVER_DIR, url, SERVER_JAR))
  }

  fn install_command(&self, target_version: &str) -> Result<String, BuildAssemblyError> {
    lookup(self.name, self.table, target_version)?;
    Ok(format!("RUN cd {} && java -jar {} {}", SERVER_DIR, SERVER_JAR, self.install))
  }
}

/// The Velocity proxy. It runs straight from the jar.
#[derive(Debug, Default)]
pub struct Velocity;

impl Modloader for Velocity {
  fn name(&self) -> &'static str {
    "velocity"
  }

  fn supported_versions(&self) -> Vec<&'static str> {
    versions(VELOCITY)
  }

  fn fetch_command(&self, target_version: &str) -> Result<String, BuildAssemblyError> {
    let url = lookup(self.name(), VELOCITY, target_version)?;
    Ok(format!("RUN cd {} && wget {} -O {}", SERVER_DIR, url, SERVER_JAR))
  }

  fn install_command(&self, target_version: &str) -> Result<String, BuildAssemblyError> {
    lookup(self.name(), VELOCITY, target_version)?;
    Ok("RUN echo 'velocity needs no installation'".to_string())
  }
}

/// Modloaders by lowercase name.
#[derive(Clone, Default)]
pub struct ModloaderRegistry {
  loaders: BTreeMap<&'static str, Arc<dyn Modloader>>,
}

impl ModloaderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_defaults() -> Self {
    let mut registry = Self::new();
    registry.register(Fabric);
    registry.register(JarLoader::forge());
    registry.register(JarLoader::neoforge());
    registry.register(JarLoader::paper());
    registry.register(Velocity);
    registry
  }

  pub fn register<M: Modloader + 'static>(&mut self, loader: M) {
    self.loaders.insert(loader.name(), Arc::new(loader));
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn Modloader>, BuildAssemblyError> {
    self
      .loaders
      .get(name.to_lowercase().as_str())
      .cloned()
      .ok_or_else(|| BuildAssemblyError::UnknownModloader(name.to_string()))
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.loaders.keys().copied().collect()
  }
}

impl std::fmt::Debug for ModloaderRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModloaderRegistry")
      .field("loaders", &self.names())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registry_knows_every_builtin_loader() {
    let registry = ModloaderRegistry::with_defaults();
    assert_eq!(
      registry.names(),
      vec!["fabric", "forge", "neoforge", "paper", "velocity"]
    );
    assert_eq!(registry.get("NeoForge").unwrap().name(), "neoforge");
  }

  #[test]
  fn unknown_loader_is_typed_error() {
    let err = ModloaderRegistry::with_defaults().get("quilt").err().unwrap();
    assert!(matches!(err, BuildAssemblyError::UnknownModloader(ref n) if n == "quilt"));
  }

  #[test]
  fn fabric_commands_use_version_table() {
    let fetch = Fabric.fetch_command("1.21.7").unwrap();
    assert_eq!(
      fetch,
      "RUN wget https://meta.fabricmc.net/v2/versions/loader/1.21.7/0.16.14/1.1.0/server/jar -O /home/mc/server.jar"
    );
    assert!(Fabric.install_command("1.21.7").unwrap().contains("-mcversion 1.21.7 -loader 0.16.14"));
  }

  #[test]
  fn unsupported_version_lists_known_versions() {
    let err = JarLoader::paper().fetch_command("1.8.9").unwrap_err();
    match err {
      BuildAssemblyError::UnsupportedVersion { loader, version, supported } => {
        assert_eq!(loader, "paper");
        assert_eq!(version, "1.8.9");
        assert_eq!(supported, vec!["1.21.6"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn jar_loaders_install_with_their_arguments() {
    assert!(JarLoader::forge().install_command("1.21.6").unwrap().ends_with("--installServer"));
    assert!(JarLoader::paper().install_command("1.21.6").unwrap().ends_with("--initSettings"));
    assert!(Velocity.fetch_command("1.21.6").unwrap().contains("velocity-3.4.0"));
  }
}
