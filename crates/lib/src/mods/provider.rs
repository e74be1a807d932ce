//! The provider contract and the types that flow through it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::package::{PackagedGroup, package_group};
use super::{Downloader, ModError, RateLimiter};
use crate::config::types::scalar_to_string;
use crate::util::fs::now_unix;
use crate::util::hash::{ContentHash, hash_file};

/// A parsed mod declaration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModRequest {
  pub slug: String,
  pub version: Option<String>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
  pub slug: String,
  pub title: String,
  pub summary: String,
  #[serde(default)]
  pub game_versions: Vec<String>,
  #[serde(default)]
  pub downloads: Option<u64>,
}

/// One downloadable file in a provider's catalog, in provider order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CatalogEntry {
  pub name: String,
  pub version: String,
  pub file_name: String,
  pub url: String,
  pub game_versions: Vec<String>,
  pub loaders: Vec<String>,
  pub dependencies: Vec<String>,
}

/// Where and for whom an artifact is fetched.
#[derive(Debug, Clone, Copy)]
pub struct FetchTarget<'a> {
  pub server: &'a str,
  pub loader: &'a str,
  pub target_version: &'a str,
  /// Download even when the file already exists.
  pub force: bool,
}

/// A resolved and downloaded artifact, as recorded in the resolution cache
/// and in package manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedModArtifact {
  pub name: String,
  pub version: String,
  pub loader: String,
  pub target_version: String,
  pub file_name: String,
  pub source: String,
  pub sha512: ContentHash,
  pub timestamp: u64,
  pub provider: String,
  #[serde(default)]
  pub dependencies: Vec<String>,
  pub path: PathBuf,
}

/// Shared plumbing handed to every provider.
#[derive(Debug, Clone)]
pub struct ProviderContext {
  pub downloader: Downloader,
  pub repo_url: String,
}

/// A source of downloadable artifacts.
///
/// Implementors provide the catalog and search queries; fetching, selection
/// and packaging have shared default implementations.
#[async_trait]
pub trait ModProvider: Send + Sync {
  /// Registry key, e.g. `modrinth`.
  fn identify(&self) -> &'static str;

  /// Base address of the provider's API.
  fn endpoint(&self) -> &str;

  fn credential(&self) -> Option<&str>;

  fn context(&self) -> &ProviderContext;

  fn limiter(&self) -> &RateLimiter;

  /// Normalize one declaration entry.
  fn parse(&self, entry: &Value) -> Result<ModRequest, ModError> {
    parse_entry(self.identify(), entry)
  }

  async fn search(&self, query: &str, version: Option<&str>) -> Result<Vec<CandidateSummary>, ModError>;

  /// Every file published for `request.slug`, in provider order.
  async fn catalog(&self, request: &ModRequest) -> Result<Vec<CatalogEntry>, ModError>;

  async fn fetch(&self, request: &ModRequest, target: &FetchTarget<'_>) -> Result<ResolvedModArtifact, ModError> {
    fetch_from_catalog(self, request, target).await
  }

  fn package(
    &self,
    artifacts: &[ResolvedModArtifact],
    output_dir: &Path,
    group: &str,
  ) -> Result<PackagedGroup, ModError> {
    package_group(artifacts, output_dir, group, &self.context().repo_url)
  }
}

/// Parse `"slug"`, `{slug: "version"}` or `{slug: {version: "x"}}`.
pub fn parse_entry(provider: &str, entry: &Value) -> Result<ModRequest, ModError> {
  let invalid = |message: &str| ModError::InvalidDeclaration {
    provider: provider.to_string(),
    entry: entry.to_string(),
    message: message.to_string(),
  };

  match entry {
    Value::String(slug) if !slug.trim().is_empty() => Ok(ModRequest {
      slug: slug.trim().to_string(),
      version: None,
    }),
    Value::Object(map) if map.len() == 1 => {
      let Some((slug, spec)) = map.iter().next() else {
        return Err(invalid("empty mapping"));
      };
      let version = match spec {
        Value::Null => None,
        Value::Object(inner) => inner.get("version").and_then(scalar_to_string),
        other => Some(scalar_to_string(other).ok_or_else(|| invalid("version must be a scalar"))?),
      };
      Ok(ModRequest {
        slug: slug.clone(),
        version,
      })
    }
    Value::Object(_) => Err(invalid("expected a single-key mapping")),
    _ => Err(invalid("expected a slug or a mapping")),
  }
}

/// First entry compatible with the loader and target version.
///
/// Provider order is the only tie-break. When `version` is given, the entry's
/// version must equal it.
pub fn select_first<'a>(
  catalog: &'a [CatalogEntry],
  version: Option<&str>,
  loader: &str,
  target_version: &str,
) -> Option<&'a CatalogEntry> {
  catalog.iter().find(|entry| {
    version.is_none_or(|v| entry.version == v)
      && entry.game_versions.iter().any(|gv| gv == target_version)
      && entry.loaders.iter().any(|l| l.eq_ignore_ascii_case(loader))
  })
}

/// Resolve through the provider catalog, reusing an existing download.
pub async fn fetch_from_catalog<P>(
  provider: &P,
  request: &ModRequest,
  target: &FetchTarget<'_>,
) -> Result<ResolvedModArtifact, ModError>
where
  P: ModProvider + ?Sized,
{
  let catalog = provider.catalog(request).await?;
  debug!(
    provider = provider.identify(),
    slug = %request.slug,
    candidates = catalog.len(),
    "catalog loaded"
  );

  let entry = select_first(&catalog, request.version.as_deref(), target.loader, target.target_version).ok_or_else(
    || ModError::NoMatch {
      slug: request.slug.clone(),
      version: request.version.clone(),
      loader: target.loader.to_string(),
      target_version: target.target_version.to_string(),
    },
  )?;

  let name = if entry.name.is_empty() {
    request.slug.clone()
  } else {
    entry.name.clone()
  };
  download_artifact(provider, entry, &name, target).await
}

/// Download `entry` unless its file is already present and build the record.
pub async fn download_artifact<P>(
  provider: &P,
  entry: &CatalogEntry,
  name: &str,
  target: &FetchTarget<'_>,
) -> Result<ResolvedModArtifact, ModError>
where
  P: ModProvider + ?Sized,
{
  let downloader = &provider.context().downloader;
  let path = downloader.artifact_path(provider.identify(), target.loader, target.target_version, &entry.file_name)?;

  let sha512 = if path.is_file() && !target.force {
    info!(
      provider = provider.identify(),
      slug = %name,
      path = %path.display(),
      "using downloaded file"
    );
    let hashed = path.clone();
    tokio::task::spawn_blocking(move || hash_file(&hashed))
      .await
      .map_err(|e| ModError::Task(e.to_string()))?
      .map_err(ModError::io(&path))?
  } else {
    provider.limiter().wait().await;
    downloader.download(&entry.url, &path).await?
  };

  Ok(ResolvedModArtifact {
    name: name.to_string(),
    version: entry.version.clone(),
    loader: target.loader.to_lowercase(),
    target_version: target.target_version.to_string(),
    file_name: entry.file_name.clone(),
    source: entry.url.clone(),
    sha512,
    timestamp: now_unix(),
    provider: provider.identify().to_string(),
    dependencies: entry.dependencies.clone(),
    path,
  })
}

/// Send a GET through the provider's limiter and decode the JSON body.
///
/// A 404 maps to [`ModError::NotFound`] for `slug`.
pub async fn get_json<P, T>(
  provider: &P,
  request: reqwest::RequestBuilder,
  slug: &str,
) -> Result<T, ModError>
where
  P: ModProvider + ?Sized,
  T: serde::de::DeserializeOwned,
{
  let request = request.build().map_err(|source| ModError::Http {
    url: provider.endpoint().to_string(),
    source,
  })?;
  let url = request.url().to_string();

  provider.limiter().wait().await;
  debug!(provider = provider.identify(), url = %url, "GET");
  let response = provider
    .context()
    .downloader
    .client()
    .execute(request)
    .await
    .map_err(|source| ModError::Http {
      url: url.clone(),
      source,
    })?;

  match response.status() {
    status if status.is_success() => {}
    reqwest::StatusCode::NOT_FOUND => {
      return Err(ModError::NotFound {
        provider: provider.identify().to_string(),
        slug: slug.to_string(),
      });
    }
    status => {
      return Err(ModError::Status {
        url,
        status: status.as_u16(),
      });
    }
  }

  let body = response.bytes().await.map_err(|source| ModError::Http {
    url: url.clone(),
    source,
  })?;
  serde_json::from_slice(&body).map_err(|e| ModError::Decode {
    url,
    message: e.to_string(),
  })
}
