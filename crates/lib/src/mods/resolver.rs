//! Resolve every server's mod declarations into downloaded artifacts.
//!
//! Declarations are grouped by their resolution tuple (provider, slug,
//! version constraint, loader, target version). Each distinct tuple is
//! resolved once on a bounded pool, and its record is written to the cache so
//! later runs return it without touching the network.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{FetchTarget, ModError, ModRequest, ProviderRegistry, ResolvedModArtifact};
use crate::cache::Cache;
use crate::config::MergedConfig;
use crate::env::MC_VERSION;
use crate::util::cancel::{CancellationToken, cancellable};
use crate::util::hash::{Hashable, hash_file};

/// Identity of one resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModKey {
  pub provider: String,
  pub slug: String,
  pub version: Option<String>,
  pub loader: String,
  pub target_version: String,
}

impl Hashable for ModKey {}

impl ModKey {
  /// Cache key of the resolution record.
  pub fn cache_key(&self) -> Result<String, ModError> {
    Ok(format!("resolutions/{}/{}.json", self.provider, self.compute_hash()?))
  }

  fn request(&self) -> ModRequest {
    ModRequest {
      slug: self.slug.clone(),
      version: self.version.clone(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
  /// Ignore resolution records and existing downloads.
  pub force: bool,
  /// Re-hash cached files before trusting their record.
  pub verify_cache_hits: bool,
  pub parallelism: usize,
}

impl Default for ResolveOptions {
  fn default() -> Self {
    Self {
      force: false,
      verify_cache_hits: false,
      parallelism: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4),
    }
  }
}

/// A declaration that could not be resolved, with every server that wanted it.
#[derive(Debug)]
pub struct ModFailure {
  pub provider: String,
  pub slug: String,
  pub targets: Vec<String>,
  pub error: ModError,
}

#[derive(Debug, Default)]
pub struct ModReport {
  /// Resolved artifacts per server, in declaration order.
  pub artifacts: BTreeMap<String, Vec<ResolvedModArtifact>>,
  pub failures: Vec<ModFailure>,
}

impl ModReport {
  pub fn for_server(&self, name: &str) -> &[ResolvedModArtifact] {
    self.artifacts.get(name).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn is_success(&self) -> bool {
    self.failures.is_empty()
  }
}

#[derive(Debug, Default)]
struct Plan {
  servers: BTreeMap<String, Vec<ModKey>>,
  jobs: BTreeMap<ModKey, Vec<String>>,
  failures: Vec<ModFailure>,
}

#[derive(Debug, Clone)]
pub struct ModResolver {
  registry: Arc<ProviderRegistry>,
  cache: Cache,
  options: ResolveOptions,
}

impl ModResolver {
  pub fn new(registry: Arc<ProviderRegistry>, cache: Cache, options: ResolveOptions) -> Self {
    Self {
      registry,
      cache,
      options,
    }
  }

  pub fn registry(&self) -> &ProviderRegistry {
    &self.registry
  }

  /// Resolve the declarations of every server in `config`.
  ///
  /// Never fails as a whole: each declaration's error is recorded against
  /// the servers that declared it.
  pub async fn resolve_all(&self, config: &MergedConfig, cancel: &CancellationToken) -> ModReport {
    let plan = self.plan(config);
    info!(
      servers = plan.servers.len(),
      declarations = plan.jobs.len(),
      "resolving mods"
    );

    let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
    let mut join_set = JoinSet::new();
    for (key, targets) in &plan.jobs {
      let this = self.clone();
      let key = key.clone();
      let server = targets.first().cloned().unwrap_or_default();
      let semaphore = semaphore.clone();
      let cancel = cancel.clone();

      join_set.spawn(async move {
        let result = match semaphore.acquire_owned().await {
          Ok(_permit) => this.resolve_for(&key, &server, &cancel).await,
          Err(_) => Err(ModError::Cancelled),
        };
        (key, result)
      });
    }

    let mut resolved: HashMap<ModKey, ResolvedModArtifact> = HashMap::new();
    let mut failures = plan.failures;
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((key, Ok(artifact))) => {
          resolved.insert(key, artifact);
        }
        Ok((key, Err(error))) => {
          error!(provider = %key.provider, slug = %key.slug, error = %error, "mod resolution failed");
          failures.push(ModFailure {
            targets: plan.jobs.get(&key).cloned().unwrap_or_default(),
            provider: key.provider,
            slug: key.slug,
            error,
          });
        }
        Err(e) => {
          error!(error = %e, "resolution task panicked");
          failures.push(ModFailure {
            provider: String::new(),
            slug: String::new(),
            targets: Vec::new(),
            error: ModError::Task(e.to_string()),
          });
        }
      }
    }

    let artifacts = plan
      .servers
      .into_iter()
      .map(|(server, keys)| {
        let list = keys.iter().filter_map(|k| resolved.get(k).cloned()).collect();
        (server, list)
      })
      .collect();

    failures.sort_by(|a, b| (&a.provider, &a.slug).cmp(&(&b.provider, &b.slug)));
    ModReport { artifacts, failures }
  }

  /// Resolve one tuple.
  pub async fn resolve(&self, key: &ModKey, cancel: &CancellationToken) -> Result<ResolvedModArtifact, ModError> {
    self.resolve_for(key, "", cancel).await
  }

  async fn resolve_for(
    &self,
    key: &ModKey,
    server: &str,
    cancel: &CancellationToken,
  ) -> Result<ResolvedModArtifact, ModError> {
    let provider = self.registry.get(&key.provider)?;
    let cache_key = key.cache_key()?;

    if !self.options.force
      && let Some(record) = self.cached(&cache_key).await?
    {
      info!(provider = %key.provider, slug = %key.slug, version = %record.version, "resolution cache hit");
      return Ok(record);
    }

    let target = FetchTarget {
      server,
      loader: &key.loader,
      target_version: &key.target_version,
      force: self.options.force,
    };
    let artifact = cancellable(cancel, provider.fetch(&key.request(), &target))
      .await
      .map_err(|_| ModError::Cancelled)??;

    self.cache.set_json(&cache_key, &artifact)?;
    info!(
      provider = %key.provider,
      slug = %key.slug,
      version = %artifact.version,
      path = %artifact.path.display(),
      "resolved mod"
    );
    Ok(artifact)
  }

  /// A cached record whose backing file still exists.
  async fn cached(&self, cache_key: &str) -> Result<Option<ResolvedModArtifact>, ModError> {
    let record: ResolvedModArtifact = match self.cache.get_json(cache_key) {
      Ok(Some(record)) => record,
      Ok(None) => return Ok(None),
      Err(e @ crate::cache::CacheError::Decode { .. }) => {
        warn!(key = %cache_key, error = %e, "discarding unreadable resolution record");
        return Ok(None);
      }
      Err(e) => return Err(e.into()),
    };

    if !record.path.is_file() {
      debug!(key = %cache_key, path = %record.path.display(), "resolution record without file");
      return Ok(None);
    }
    if !self.options.verify_cache_hits {
      return Ok(Some(record));
    }

    let checked = record.clone();
    let verified = tokio::task::spawn_blocking(move || verify(&checked))
      .await
      .map_err(|e| ModError::Task(e.to_string()))?;
    match verified {
      Ok(()) => Ok(Some(record)),
      Err(e @ ModError::Integrity { .. }) => {
        warn!(path = %record.path.display(), error = %e, "cached artifact is corrupt, resolving again");
        std::fs::remove_file(&record.path).map_err(ModError::io(&record.path))?;
        self.cache.remove(cache_key)?;
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  /// Check one artifact's file against its recorded digest.
  pub fn verify(&self, artifact: &ResolvedModArtifact) -> Result<(), ModError> {
    verify(artifact)
  }

  fn plan(&self, config: &MergedConfig) -> Plan {
    let mut plan = Plan::default();
    let defaults = config.defaults();

    for (name, server) in config.servers() {
      let keys = plan.servers.entry(name.clone()).or_default();
      if server.mods.values().all(Vec::is_empty) {
        continue;
      }

      let planning_failure = |error| ModFailure {
        provider: String::new(),
        slug: String::new(),
        targets: vec![name.clone()],
        error,
      };
      let Some(loader) = server.modloader.as_deref() else {
        plan.failures.push(planning_failure(ModError::MissingLoader { server: name.clone() }));
        continue;
      };
      let env = server.merged_env(defaults);
      let Some(target_version) = env.get(MC_VERSION) else {
        plan.failures.push(planning_failure(ModError::MissingTargetVersion { server: name.clone() }));
        continue;
      };

      for (provider_name, entries) in &server.mods {
        let provider = match self.registry.get(provider_name) {
          Ok(provider) => provider,
          Err(error) => {
            plan.failures.push(ModFailure {
              provider: provider_name.clone(),
              ..planning_failure(error)
            });
            continue;
          }
        };

        for entry in entries {
          let request = match provider.parse(entry) {
            Ok(request) => request,
            Err(error) => {
              plan.failures.push(ModFailure {
                provider: provider_name.clone(),
                slug: entry.to_string(),
                ..planning_failure(error)
              });
              continue;
            }
          };
          let key = ModKey {
            provider: provider.identify().to_string(),
            slug: request.slug,
            version: request.version,
            loader: loader.to_lowercase(),
            target_version: target_version.clone(),
          };
          if keys.contains(&key) {
            continue;
          }
          let targets = plan.jobs.entry(key.clone()).or_default();
          targets.push(name.clone());
          keys.push(key);
        }
      }
    }
    plan
  }
}

fn verify(artifact: &ResolvedModArtifact) -> Result<(), ModError> {
  if !artifact.path.is_file() {
    return Err(ModError::MissingFile(artifact.path.clone()));
  }
  let actual = hash_file(&artifact.path).map_err(ModError::io(&artifact.path))?;
  if actual != artifact.sha512 {
    return Err(ModError::Integrity {
      path: artifact.path.clone(),
      expected: artifact.sha512.to_string(),
      actual: actual.to_string(),
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mods::download::http_client;
  use crate::mods::providers::ModrinthProvider;
  use crate::mods::{CandidateSummary, CatalogEntry, Downloader, ModProvider, ProviderContext, RateLimiter};
  use crate::util::fs::now_unix;
  use crate::util::hash::hash_bytes;
  use async_trait::async_trait;
  use serde_json::json;
  use std::path::Path;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use tempfile::TempDir;

  fn context(downloads: &Path) -> ProviderContext {
    ProviderContext {
      downloader: Downloader::new(http_client().unwrap(), downloads),
      repo_url: "https://repo".to_string(),
    }
  }

  /// Serves a single fixed catalog entry and counts fetches.
  #[derive(Debug)]
  struct CountingProvider {
    context: ProviderContext,
    limiter: RateLimiter,
    fetches: Arc<AtomicUsize>,
  }

  #[async_trait]
  impl ModProvider for CountingProvider {
    fn identify(&self) -> &'static str {
      "fake"
    }

    fn endpoint(&self) -> &str {
      "fake://"
    }

    fn credential(&self) -> Option<&str> {
      None
    }

    fn context(&self) -> &ProviderContext {
      &self.context
    }

    fn limiter(&self) -> &RateLimiter {
      &self.limiter
    }

    async fn search(&self, _query: &str, _version: Option<&str>) -> Result<Vec<CandidateSummary>, ModError> {
      Ok(Vec::new())
    }

    async fn catalog(&self, request: &ModRequest) -> Result<Vec<CatalogEntry>, ModError> {
      if request.slug == "broken" {
        return Err(ModError::NotFound {
          provider: "fake".to_string(),
          slug: request.slug.clone(),
        });
      }
      Ok(vec![CatalogEntry {
        name: request.slug.clone(),
        version: "1.0.0".to_string(),
        file_name: format!("{}.jar", request.slug),
        url: String::new(),
        game_versions: vec!["1.21.6".to_string()],
        loaders: vec!["fabric".to_string()],
        dependencies: vec![],
      }])
    }

    async fn fetch(&self, request: &ModRequest, target: &FetchTarget<'_>) -> Result<ResolvedModArtifact, ModError> {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      let entry = self.catalog(request).await?.remove(0);
      let path = self.context.downloader.artifact_path(
        self.identify(),
        target.loader,
        target.target_version,
        &entry.file_name,
      )?;
      std::fs::create_dir_all(path.parent().unwrap()).unwrap();
      std::fs::write(&path, entry.name.as_bytes()).unwrap();
      Ok(ResolvedModArtifact {
        name: entry.name.clone(),
        version: entry.version,
        loader: target.loader.to_string(),
        target_version: target.target_version.to_string(),
        file_name: entry.file_name,
        source: entry.url,
        sha512: hash_bytes(entry.name.as_bytes()),
        timestamp: now_unix(),
        provider: self.identify().to_string(),
        dependencies: entry.dependencies,
        path,
      })
    }
  }

  fn fake_registry(downloads: &Path) -> (Arc<ProviderRegistry>, Arc<AtomicUsize>) {
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut registry = ProviderRegistry::new();
    registry.register(CountingProvider {
      context: context(downloads),
      limiter: RateLimiter::new(Duration::ZERO),
      fetches: fetches.clone(),
    });
    (Arc::new(registry), fetches)
  }

  fn config(value: serde_json::Value) -> MergedConfig {
    MergedConfig::from_value(value, Vec::new()).unwrap()
  }

  fn options() -> ResolveOptions {
    ResolveOptions {
      parallelism: 2,
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn shared_declarations_resolve_once() {
    let temp = TempDir::new().unwrap();
    let (registry, fetches) = fake_registry(&temp.path().join("dl"));
    let resolver = ModResolver::new(registry, Cache::new(temp.path().join("cache")), options());

    let config = config(json!({
      "version": "0.1",
      "defaults": {"env": {"MC_VERSION": "1.21.6"}},
      "servers": {
        "lobby": {"parent_image": "img", "modloader": "fabric", "mods": {"fake": ["lithium", "sodium"]}},
        "survival": {"parent_image": "img", "modloader": "Fabric", "mods": {"fake": ["sodium"]}},
        "proxy": {"parent_image": "img"}
      }
    }));
    let report = resolver.resolve_all(&config, &CancellationToken::new()).await;

    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    let lobby: Vec<_> = report.for_server("lobby").iter().map(|a| a.name.as_str()).collect();
    assert_eq!(lobby, vec!["lithium", "sodium"]);
    assert_eq!(report.for_server("survival")[0].name, "sodium");
    assert!(report.for_server("proxy").is_empty());
  }

  #[tokio::test]
  async fn failing_declaration_does_not_stop_siblings() {
    let temp = TempDir::new().unwrap();
    let (registry, _) = fake_registry(&temp.path().join("dl"));
    let resolver = ModResolver::new(registry, Cache::new(temp.path().join("cache")), options());

    let config = config(json!({
      "version": "0.1",
      "defaults": {"env": {"MC_VERSION": "1.21.6"}},
      "servers": {
        "lobby": {"parent_image": "img", "modloader": "fabric",
                  "mods": {"fake": ["broken", "sodium"], "ftb": ["x"]}}
      }
    }));
    let report = resolver.resolve_all(&config, &CancellationToken::new()).await;

    assert_eq!(report.for_server("lobby").len(), 1);
    assert_eq!(report.failures.len(), 2);
    assert!(
      report
        .failures
        .iter()
        .any(|f| matches!(f.error, ModError::UnknownProvider(ref p) if p == "ftb"))
    );
    let broken = report.failures.iter().find(|f| f.slug == "broken").unwrap();
    assert_eq!(broken.targets, vec!["lobby"]);
  }

  #[tokio::test]
  async fn missing_loader_or_version_is_scoped_to_server() {
    let temp = TempDir::new().unwrap();
    let (registry, fetches) = fake_registry(&temp.path().join("dl"));
    let resolver = ModResolver::new(registry, Cache::new(temp.path().join("cache")), options());

    let config = config(json!({
      "version": "0.1",
      "servers": {
        "a": {"parent_image": "img", "mods": {"fake": ["sodium"]}},
        "b": {"parent_image": "img", "modloader": "fabric", "mods": {"fake": ["sodium"]}}
      }
    }));
    let report = resolver.resolve_all(&config, &CancellationToken::new()).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 0);
    assert!(report.failures.iter().any(|f| matches!(f.error, ModError::MissingLoader { ref server } if server == "a")));
    assert!(
      report
        .failures
        .iter()
        .any(|f| matches!(f.error, ModError::MissingTargetVersion { ref server } if server == "b"))
    );
  }

  #[tokio::test]
  async fn cached_declaration_makes_no_network_calls() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();
    let catalog = server
      .mock("GET", "/project/sodium/version")
      .with_status(200)
      .with_body(
        json!([{
          "version_number": "0.6.13",
          "game_versions": ["1.21.6"],
          "loaders": ["fabric"],
          "files": [{"url": format!("{}/cdn/sodium.jar", url), "filename": "sodium.jar", "primary": true}]
        }])
        .to_string(),
      )
      .expect(1)
      .create_async()
      .await;
    let file = server
      .mock("GET", "/cdn/sodium.jar")
      .with_status(200)
      .with_body("sodium")
      .expect(1)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let mut registry = ProviderRegistry::new();
    registry.register(
      ModrinthProvider::new(context(&temp.path().join("dl")), None)
        .with_endpoint(url.clone())
        .with_limiter(RateLimiter::new(Duration::ZERO)),
    );
    let resolver = ModResolver::new(Arc::new(registry), Cache::new(temp.path().join("cache")), options());
    let key = ModKey {
      provider: "modrinth".to_string(),
      slug: "sodium".to_string(),
      version: None,
      loader: "fabric".to_string(),
      target_version: "1.21.6".to_string(),
    };

    let cancel = CancellationToken::new();
    let first = resolver.resolve(&key, &cancel).await.unwrap();
    let second = resolver.resolve(&key, &cancel).await.unwrap();

    catalog.assert_async().await;
    file.assert_async().await;
    assert_eq!(first, second);
    assert!(resolver.verify(&second).is_ok());
  }

  #[tokio::test]
  async fn corrupt_cache_hit_is_refetched_when_verifying() {
    let temp = TempDir::new().unwrap();
    let (registry, fetches) = fake_registry(&temp.path().join("dl"));
    let cache = Cache::new(temp.path().join("cache"));
    let key = ModKey {
      provider: "fake".to_string(),
      slug: "sodium".to_string(),
      version: None,
      loader: "fabric".to_string(),
      target_version: "1.21.6".to_string(),
    };
    let cancel = CancellationToken::new();

    let plain = ModResolver::new(registry.clone(), cache.clone(), options());
    let first = plain.resolve(&key, &cancel).await.unwrap();
    std::fs::write(&first.path, b"tampered").unwrap();

    assert!(matches!(plain.verify(&first), Err(ModError::Integrity { .. })));
    plain.resolve(&key, &cancel).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let verifying = ModResolver::new(
      registry,
      cache,
      ResolveOptions {
        verify_cache_hits: true,
        ..options()
      },
    );
    let fresh = verifying.resolve(&key, &cancel).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert!(verifying.verify(&fresh).is_ok());
  }

  #[tokio::test]
  async fn cancelled_token_fails_resolution() {
    let temp = TempDir::new().unwrap();
    let (registry, _) = fake_registry(&temp.path().join("dl"));
    let resolver = ModResolver::new(registry, Cache::new(temp.path().join("cache")), options());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let key = ModKey {
      provider: "fake".to_string(),
      slug: "sodium".to_string(),
      version: None,
      loader: "fabric".to_string(),
      target_version: "1.21.6".to_string(),
    };
    let err = resolver.resolve(&key, &cancel).await.unwrap_err();
    assert!(matches!(err, ModError::Cancelled));
  }

  #[test]
  fn cache_key_depends_on_every_field() {
    let base = ModKey {
      provider: "modrinth".to_string(),
      slug: "sodium".to_string(),
      version: None,
      loader: "fabric".to_string(),
      target_version: "1.21.6".to_string(),
    };
    let other = ModKey {
      target_version: "1.21.7".to_string(),
      ..base.clone()
    };
    assert!(base.cache_key().unwrap().starts_with("resolutions/modrinth/"));
    assert_ne!(base.cache_key().unwrap(), other.cache_key().unwrap());
  }
}
