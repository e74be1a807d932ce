//! Hangar, the PaperMC plugin repository (`https://hangar.papermc.io/api/v1`).
//!
//! Declarations are either a project slug or a direct `https://` link to a
//! plugin jar. Links skip the catalog entirely.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::endpoint_url;
use crate::mods::download::file_name_from_url;
use crate::mods::provider::{download_artifact, fetch_from_catalog, get_json, parse_entry};
use crate::mods::{
  CandidateSummary, CatalogEntry, FetchTarget, ModError, ModProvider, ModRequest, ProviderContext, RateLimiter,
  ResolvedModArtifact,
};

pub const HANGAR_API: &str = "https://hangar.papermc.io/api/v1";

#[derive(Debug)]
pub struct HangarProvider {
  context: ProviderContext,
  endpoint: String,
  limiter: RateLimiter,
}

impl HangarProvider {
  pub fn new(context: ProviderContext) -> Self {
    Self {
      context,
      endpoint: HANGAR_API.to_string(),
      limiter: RateLimiter::new(std::time::Duration::from_millis(100)),
    }
  }

  pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
    self.endpoint = endpoint.into().trim_end_matches('/').to_string();
    self
  }

  pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
    self.limiter = limiter;
    self
  }

  fn get(&self, segments: &[&str]) -> Result<reqwest::RequestBuilder, ModError> {
    let url = endpoint_url(&self.endpoint, segments)?;
    Ok(
      self
        .context
        .downloader
        .client()
        .get(url)
        .header("Accept", "application/json"),
    )
  }
}

fn is_link(slug: &str) -> bool {
  slug.starts_with("https://") || slug.starts_with("http://")
}

#[derive(Debug, Deserialize)]
struct Page<T> {
  #[serde(default = "Vec::new")]
  result: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Version {
  name: String,
  #[serde(default)]
  platform_dependencies: BTreeMap<String, Vec<String>>,
  #[serde(default)]
  downloads: BTreeMap<String, PlatformDownload>,
  #[serde(default)]
  plugin_dependencies: BTreeMap<String, Vec<PluginDependency>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformDownload {
  file_info: Option<FileInfo>,
  download_url: Option<String>,
  external_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
  name: String,
}

#[derive(Debug, Deserialize)]
struct PluginDependency {
  name: String,
  #[serde(default)]
  required: bool,
}

#[derive(Debug, Deserialize)]
struct Project {
  name: String,
  namespace: Namespace,
  #[serde(default)]
  description: String,
  #[serde(default)]
  stats: Option<Stats>,
}

#[derive(Debug, Deserialize)]
struct Namespace {
  slug: String,
}

#[derive(Debug, Deserialize)]
struct Stats {
  downloads: Option<u64>,
}

impl Version {
  /// One entry per platform that has a usable download.
  fn into_entries(self, slug: &str) -> Vec<CatalogEntry> {
    let Version {
      name: version,
      mut platform_dependencies,
      downloads,
      mut plugin_dependencies,
    } = self;

    downloads
      .into_iter()
      .filter_map(|(platform, download)| {
        let url = download.download_url.or(download.external_url)?;
        let file_name = download
          .file_info
          .map(|f| f.name)
          .or_else(|| file_name_from_url(&url))?;
        Some(CatalogEntry {
          name: slug.to_string(),
          version: version.clone(),
          file_name,
          url,
          game_versions: platform_dependencies.remove(&platform).unwrap_or_default(),
          dependencies: plugin_dependencies
            .remove(&platform)
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.required)
            .map(|d| d.name)
            .collect(),
          loaders: vec![platform],
        })
      })
      .collect()
  }
}

#[async_trait]
impl ModProvider for HangarProvider {
  fn identify(&self) -> &'static str {
    "hangar"
  }

  fn endpoint(&self) -> &str {
    &self.endpoint
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

  fn parse(&self, entry: &Value) -> Result<ModRequest, ModError> {
    match entry {
      Value::String(link) if is_link(link.trim()) => Ok(ModRequest {
        slug: link.trim().to_string(),
        version: None,
      }),
      other => parse_entry(self.identify(), other),
    }
  }

  async fn search(&self, query: &str, _version: Option<&str>) -> Result<Vec<CandidateSummary>, ModError> {
    let request = self.get(&["projects"])?.query(&[("q", query), ("limit", "10")]);
    let page: Page<Project> = get_json(self, request, query).await?;
    Ok(
      page
        .result
        .into_iter()
        .map(|p| CandidateSummary {
          slug: p.namespace.slug,
          title: p.name,
          summary: p.description,
          game_versions: Vec::new(),
          downloads: p.stats.and_then(|s| s.downloads),
        })
        .collect(),
    )
  }

  async fn catalog(&self, request: &ModRequest) -> Result<Vec<CatalogEntry>, ModError> {
    let versions = self.get(&["projects", &request.slug, "versions"])?;
    let page: Page<Version> = get_json(self, versions, &request.slug).await?;
    Ok(
      page
        .result
        .into_iter()
        .flat_map(|v| v.into_entries(&request.slug))
        .collect(),
    )
  }

  async fn fetch(&self, request: &ModRequest, target: &FetchTarget<'_>) -> Result<ResolvedModArtifact, ModError> {
    if !is_link(&request.slug) {
      return fetch_from_catalog(self, request, target).await;
    }

    let file_name = file_name_from_url(&request.slug).ok_or_else(|| ModError::InvalidDeclaration {
      provider: self.identify().to_string(),
      entry: request.slug.clone(),
      message: "link has no file name".to_string(),
    })?;
    let name = Path::new(&file_name)
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| file_name.clone());
    let entry = CatalogEntry {
      name: name.clone(),
      version: "unknown".to_string(),
      file_name,
      url: request.slug.clone(),
      game_versions: vec![target.target_version.to_string()],
      loaders: vec![target.loader.to_string()],
      dependencies: Vec::new(),
    };
    download_artifact(self, &entry, &name, target).await
  }
}
