//! Provider registry.
//!
//! Providers are looked up by their key as written in server declarations,
//! ignoring ASCII case. Aliases cover spellings used by older configurations.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::providers::{CurseForgeProvider, HangarProvider, ModrinthProvider};
use super::{ModError, ModProvider, ProviderContext};
use crate::env::CraftEnv;

#[derive(Default)]
pub struct ProviderRegistry {
  providers: BTreeMap<&'static str, Arc<dyn ModProvider>>,
  aliases: BTreeMap<String, &'static str>,
}

impl ProviderRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the built-in providers.
  pub fn with_defaults(context: ProviderContext, env: &CraftEnv) -> Self {
    let mut registry = Self::new();
    registry.register(ModrinthProvider::from_env(context.clone(), env));
    registry.register(CurseForgeProvider::from_env(context.clone(), env));
    registry.register(HangarProvider::new(context));
    registry.alias("modrith", "modrinth");
    registry.alias("hanger", "hangar");
    registry.alias("curse_forge", "curseforge");
    registry
  }

  /// Register a provider, replacing any provider with the same key.
  pub fn register<P: ModProvider + 'static>(&mut self, provider: P) {
    self.register_arc(Arc::new(provider));
  }

  pub fn register_arc(&mut self, provider: Arc<dyn ModProvider>) {
    self.providers.insert(provider.identify(), provider);
  }

  pub fn alias(&mut self, alias: &str, key: &'static str) {
    self.aliases.insert(alias.to_ascii_lowercase(), key);
  }

  /// Canonical key for `name`, lowercased and following aliases.
  pub fn canonical(&self, name: &str) -> String {
    let name = name.to_ascii_lowercase();
    match self.aliases.get(&name) {
      Some(key) => key.to_string(),
      None => name,
    }
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn ModProvider>, ModError> {
    self
      .providers
      .get(self.canonical(name).as_str())
      .cloned()
      .ok_or_else(|| ModError::UnknownProvider(name.to_string()))
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.providers.keys().copied().collect()
  }

  pub fn len(&self) -> usize {
    self.providers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.providers.is_empty()
  }
}

impl std::fmt::Debug for ProviderRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProviderRegistry")
      .field("providers", &self.names())
      .field("aliases", &self.aliases)
      .finish()
  }
}
