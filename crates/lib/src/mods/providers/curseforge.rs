//! CurseForge (`https://api.curseforge.com`).
//!
//! Every call needs an API key, sent as `x-api-key`. Files list loaders and
//! game versions together in `gameVersions`; entries that start with a digit
//! are game versions, the rest are loader and environment tags.

use async_trait::async_trait;
use serde::Deserialize;

use super::endpoint_url;
use crate::env::{CURSE_FORGE_KEY, CraftEnv};
use crate::mods::provider::get_json;
use crate::mods::{CandidateSummary, CatalogEntry, ModError, ModProvider, ModRequest, ProviderContext, RateLimiter};

pub const CURSEFORGE_API: &str = "https://api.curseforge.com";

const MINECRAFT_GAME_ID: &str = "432";
const MODS_CLASS_ID: &str = "6";
const REQUIRED_DEPENDENCY: u32 = 3;

#[derive(Debug)]
pub struct CurseForgeProvider {
  context: ProviderContext,
  endpoint: String,
  api_key: Option<String>,
  limiter: RateLimiter,
}

impl CurseForgeProvider {
  pub fn new(context: ProviderContext, api_key: Option<String>) -> Self {
    Self {
      context,
      endpoint: CURSEFORGE_API.to_string(),
      api_key,
      limiter: RateLimiter::new(std::time::Duration::from_millis(100)),
    }
  }

  pub fn from_env(context: ProviderContext, env: &CraftEnv) -> Self {
    Self::new(context, env.get(CURSE_FORGE_KEY).map(str::to_string))
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
    let key = self.api_key.as_deref().ok_or_else(|| ModError::MissingCredential {
      provider: self.identify().to_string(),
      var: CURSE_FORGE_KEY.to_string(),
    })?;
    Ok(
      self
        .context
        .downloader
        .client()
        .get(endpoint_url(&self.endpoint, segments)?)
        .header("Accept", "application/json")
        .header("x-api-key", key),
    )
  }

  async fn project_id(&self, slug: &str) -> Result<u64, ModError> {
    let request = self.get(&["v1", "mods", "search"])?.query(&[
      ("gameId", MINECRAFT_GAME_ID),
      ("classId", MODS_CLASS_ID),
      ("slug", slug),
    ]);
    let response: DataEnvelope<Vec<Project>> = get_json(self, request, slug).await?;
    response
      .data
      .into_iter()
      .find(|p| p.slug == slug)
      .map(|p| p.id)
      .ok_or_else(|| ModError::NotFound {
        provider: self.identify().to_string(),
        slug: slug.to_string(),
      })
  }
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
  data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Project {
  id: u64,
  slug: String,
  #[serde(default)]
  name: String,
  #[serde(default)]
  summary: String,
  #[serde(default)]
  download_count: Option<f64>,
  #[serde(default)]
  latest_files_indexes: Vec<FileIndex>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileIndex {
  game_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFile {
  id: u64,
  display_name: String,
  file_name: String,
  download_url: Option<String>,
  #[serde(default)]
  game_versions: Vec<String>,
  #[serde(default)]
  dependencies: Vec<FileDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileDependency {
  mod_id: u64,
  relation_type: u32,
}

impl ProjectFile {
  fn into_entry(self, slug: &str) -> CatalogEntry {
    let (game_versions, loaders): (Vec<String>, Vec<String>) = self
      .game_versions
      .into_iter()
      .partition(|v| v.starts_with(|c: char| c.is_ascii_digit()));
    let url = self
      .download_url
      .unwrap_or_else(|| cdn_url(self.id, &self.file_name));
    CatalogEntry {
      name: slug.to_string(),
      version: self.display_name,
      file_name: self.file_name,
      url,
      game_versions,
      loaders,
      dependencies: self
        .dependencies
        .into_iter()
        .filter(|d| d.relation_type == REQUIRED_DEPENDENCY)
        .map(|d| d.mod_id.to_string())
        .collect(),
    }
  }
}

/// Files whose author disabled third-party downloads have no `downloadUrl`.
fn cdn_url(file_id: u64, file_name: &str) -> String {
  format!(
    "https://edge.forgecdn.net/files/{}/{}/{}",
    file_id / 1000,
    file_id % 1000,
    file_name
  )
}

#[async_trait]
impl ModProvider for CurseForgeProvider {
  fn identify(&self) -> &'static str {
    "curseforge"
  }

  fn endpoint(&self) -> &str {
    &self.endpoint
  }

  fn credential(&self) -> Option<&str> {
    self.api_key.as_deref()
  }

  fn context(&self) -> &ProviderContext {
    &self.context
  }

  fn limiter(&self) -> &RateLimiter {
    &self.limiter
  }

  async fn search(&self, query: &str, version: Option<&str>) -> Result<Vec<CandidateSummary>, ModError> {
    let mut params = vec![
      ("gameId", MINECRAFT_GAME_ID),
      ("classId", MODS_CLASS_ID),
      ("searchFilter", query),
      ("pageSize", "10"),
    ];
    if let Some(version) = version {
      params.push(("gameVersion", version));
    }
    let request = self.get(&["v1", "mods", "search"])?.query(&params);
    let response: DataEnvelope<Vec<Project>> = get_json(self, request, query).await?;

    Ok(
      response
        .data
        .into_iter()
        .map(|project| {
          let mut game_versions: Vec<String> = project
            .latest_files_indexes
            .into_iter()
            .map(|i| i.game_version)
            .collect();
          game_versions.dedup();
          CandidateSummary {
            slug: project.slug,
            title: project.name,
            summary: project.summary,
            game_versions,
            downloads: project.download_count.map(|c| c as u64),
          }
        })
        .collect(),
    )
  }

  async fn catalog(&self, request: &ModRequest) -> Result<Vec<CatalogEntry>, ModError> {
    let id = self.project_id(&request.slug).await?;
    let files = self.get(&["v1", "mods", &id.to_string(), "files"])?;
    let response: DataEnvelope<Vec<ProjectFile>> = get_json(self, files, &request.slug).await?;
    Ok(
      response
        .data
        .into_iter()
        .map(|f| f.into_entry(&request.slug))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mods::download::http_client;
  use crate::mods::{Downloader, FetchTarget};
  use mockito::Matcher;
  use serde_json::json;
  use std::time::Duration;
  use tempfile::TempDir;

  fn provider(endpoint: &str, downloads: &std::path::Path, key: Option<&str>) -> CurseForgeProvider {
    let context = ProviderContext {
      downloader: Downloader::new(http_client().unwrap(), downloads),
      repo_url: "https://repo".to_string(),
    };
    CurseForgeProvider::new(context, key.map(str::to_string))
      .with_endpoint(endpoint)
      .with_limiter(RateLimiter::new(Duration::ZERO))
  }

  #[tokio::test]
  async fn resolves_slug_then_files() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();
    let search = server
      .mock("GET", "/v1/mods/search")
      .match_query(Matcher::AllOf(vec![
        Matcher::UrlEncoded("gameId".into(), "432".into()),
        Matcher::UrlEncoded("classId".into(), "6".into()),
        Matcher::UrlEncoded("slug".into(), "jei".into()),
      ]))
      .match_header("x-api-key", "secret")
      .with_status(200)
      .with_body(json!({"data": [{"id": 238222, "slug": "jei", "name": "JEI"}]}).to_string())
      .expect(1)
      .create_async()
      .await;
    server
      .mock("GET", "/v1/mods/238222/files")
      .with_status(200)
      .with_body(
        json!({"data": [
          {"id": 1, "displayName": "jei-1.21.7", "fileName": "jei-new.jar", "downloadUrl": format!("{}/f/jei-new.jar", url),
           "gameVersions": ["1.21.7", "NeoForge"]},
          {"id": 2, "displayName": "jei-1.21.6", "fileName": "jei-old.jar", "downloadUrl": format!("{}/f/jei-old.jar", url),
           "gameVersions": ["1.21.6", "NeoForge", "Server"],
           "dependencies": [{"modId": 42, "relationType": 3}, {"modId": 7, "relationType": 2}]}
        ]})
        .to_string(),
      )
      .create_async()
      .await;
    server
      .mock("GET", "/f/jei-old.jar")
      .with_status(200)
      .with_body("jei")
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let provider = provider(&url, temp.path(), Some("secret"));
    let artifact = provider
      .fetch(
        &ModRequest {
          slug: "jei".to_string(),
          version: None,
        },
        &FetchTarget {
          server: "modded",
          loader: "neoforge",
          target_version: "1.21.6",
          force: false,
        },
      )
      .await
      .unwrap();

    search.assert_async().await;
    assert_eq!(artifact.file_name, "jei-old.jar");
    assert_eq!(artifact.dependencies, vec!["42"]);
    assert_eq!(artifact.loader, "neoforge");
  }

  #[tokio::test]
  async fn missing_key_fails_without_network() {
    let mut server = mockito::Server::new_async().await;
    let any = server
      .mock("GET", Matcher::Any)
      .expect(0)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let err = provider(&server.url(), temp.path(), None)
      .search("jei", None)
      .await
      .unwrap_err();

    any.assert_async().await;
    assert!(matches!(err, ModError::MissingCredential { ref var, .. } if var == CURSE_FORGE_KEY));
  }

  #[test]
  fn file_without_download_url_uses_cdn() {
    let file = ProjectFile {
      id: 4_567_890,
      display_name: "x".to_string(),
      file_name: "x.jar".to_string(),
      download_url: None,
      game_versions: vec!["1.20.1".to_string(), "Forge".to_string()],
      dependencies: vec![],
    };
    let entry = file.into_entry("x");
    assert_eq!(entry.url, "https://edge.forgecdn.net/files/4567/890/x.jar");
    assert_eq!(entry.game_versions, vec!["1.20.1"]);
    assert_eq!(entry.loaders, vec!["Forge"]);
  }
}
