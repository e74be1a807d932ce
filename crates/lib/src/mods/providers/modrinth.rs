//! Modrinth (`https://api.modrinth.com/v2`).
//!
//! Published quota is 300 requests per minute. A token is optional and only
//! raises limits.

use async_trait::async_trait;
use serde::Deserialize;

use super::endpoint_url;
use crate::env::{CraftEnv, MODRINTH_TOKEN};
use crate::mods::provider::get_json;
use crate::mods::{CandidateSummary, CatalogEntry, ModError, ModProvider, ModRequest, ProviderContext, RateLimiter};

pub const MODRINTH_API: &str = "https://api.modrinth.com/v2";

#[derive(Debug)]
pub struct ModrinthProvider {
  context: ProviderContext,
  endpoint: String,
  token: Option<String>,
  limiter: RateLimiter,
}

impl ModrinthProvider {
  pub fn new(context: ProviderContext, token: Option<String>) -> Self {
    Self {
      context,
      endpoint: MODRINTH_API.to_string(),
      token,
      limiter: RateLimiter::per_minute(300),
    }
  }

  pub fn from_env(context: ProviderContext, env: &CraftEnv) -> Self {
    Self::new(context, env.get(MODRINTH_TOKEN).map(str::to_string))
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
    let request = self.context.downloader.client().get(url);
    Ok(match &self.token {
      Some(token) => request.header("Authorization", token),
      None => request,
    })
  }
}

#[derive(Debug, Deserialize)]
struct ProjectVersion {
  version_number: String,
  #[serde(default)]
  game_versions: Vec<String>,
  #[serde(default)]
  loaders: Vec<String>,
  #[serde(default)]
  files: Vec<VersionFile>,
  #[serde(default)]
  dependencies: Vec<Dependency>,
}

#[derive(Debug, Deserialize)]
struct VersionFile {
  url: String,
  filename: String,
  #[serde(default)]
  primary: bool,
}

#[derive(Debug, Deserialize)]
struct Dependency {
  project_id: Option<String>,
  #[serde(default)]
  dependency_type: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
  #[serde(default)]
  hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
  slug: String,
  #[serde(default)]
  title: String,
  #[serde(default)]
  description: String,
  #[serde(default)]
  versions: Vec<String>,
  downloads: Option<u64>,
}

impl ProjectVersion {
  fn into_entry(self, slug: &str) -> Option<CatalogEntry> {
    let ProjectVersion {
      version_number,
      game_versions,
      loaders,
      files,
      dependencies,
    } = self;
    let primary = files.iter().position(|f| f.primary).unwrap_or(0);
    let file = files.into_iter().nth(primary)?;
    Some(CatalogEntry {
      name: slug.to_string(),
      version: version_number,
      file_name: file.filename,
      url: file.url,
      game_versions,
      loaders,
      dependencies: dependencies
        .into_iter()
        .filter(|d| d.dependency_type == "required")
        .filter_map(|d| d.project_id)
        .collect(),
    })
  }
}

#[async_trait]
impl ModProvider for ModrinthProvider {
  fn identify(&self) -> &'static str {
    "modrinth"
  }

  fn endpoint(&self) -> &str {
    &self.endpoint
  }

  fn credential(&self) -> Option<&str> {
    self.token.as_deref()
  }

  fn context(&self) -> &ProviderContext {
    &self.context
  }

  fn limiter(&self) -> &RateLimiter {
    &self.limiter
  }

  async fn search(&self, query: &str, version: Option<&str>) -> Result<Vec<CandidateSummary>, ModError> {
    let mut params = vec![("query", query.to_string()), ("limit", "10".to_string())];
    if let Some(version) = version {
      params.push(("facets", format!("[[\"versions:{}\"]]", version)));
    }
    let response: SearchResponse = get_json(self, self.get(&["search"])?.query(&params), query).await?;
    Ok(
      response
        .hits
        .into_iter()
        .map(|hit| CandidateSummary {
          slug: hit.slug,
          title: hit.title,
          summary: hit.description,
          game_versions: hit.versions,
          downloads: hit.downloads,
        })
        .collect(),
    )
  }

  async fn catalog(&self, request: &ModRequest) -> Result<Vec<CatalogEntry>, ModError> {
    let listing = self.get(&["project", &request.slug, "version"])?;
    let versions: Vec<ProjectVersion> = get_json(self, listing, &request.slug).await?;
    Ok(
      versions
        .into_iter()
        .filter_map(|v| v.into_entry(&request.slug))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mods::download::http_client;
  use crate::mods::{Downloader, FetchTarget};
  use serde_json::json;
  use std::time::Duration;
  use tempfile::TempDir;

  fn provider(server: &mockito::Server, downloads: &std::path::Path) -> ModrinthProvider {
    let context = ProviderContext {
      downloader: Downloader::new(http_client().unwrap(), downloads),
      repo_url: "https://repo".to_string(),
    };
    ModrinthProvider::new(context, None)
      .with_endpoint(server.url())
      .with_limiter(RateLimiter::new(Duration::ZERO))
  }

  fn version(server_url: &str, number: &str, game: &[&str], loaders: &[&str]) -> serde_json::Value {
    json!({
      "name": format!("Sodium {}", number),
      "version_number": number,
      "game_versions": game,
      "loaders": loaders,
      "files": [
        {"url": format!("{}/cdn/sodium-{}.jar", server_url, number), "filename": format!("sodium-{}.jar", number), "primary": true}
      ],
      "dependencies": [
        {"project_id": "P7dR8mSH", "dependency_type": "required"},
        {"project_id": "optional1", "dependency_type": "optional"}
      ]
    })
  }

  #[tokio::test]
  async fn fetch_selects_second_candidate_and_downloads_it() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();
    let body = json!([
      version(&url, "0.7.0", &["1.21.7"], &["fabric"]),
      version(&url, "0.6.13", &["1.21.6"], &["fabric", "quilt"]),
    ]);
    let catalog = server
      .mock("GET", "/project/sodium/version")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(body.to_string())
      .expect(1)
      .create_async()
      .await;
    let file = server
      .mock("GET", "/cdn/sodium-0.6.13.jar")
      .with_status(200)
      .with_body("sodium-bytes")
      .expect(1)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let provider = provider(&server, temp.path());
    let request = provider.parse(&json!("sodium")).unwrap();
    let artifact = provider
      .fetch(
        &request,
        &FetchTarget {
          server: "lobby",
          loader: "fabric",
          target_version: "1.21.6",
          force: false,
        },
      )
      .await
      .unwrap();

    catalog.assert_async().await;
    file.assert_async().await;
    assert_eq!(artifact.version, "0.6.13");
    assert_eq!(artifact.file_name, "sodium-0.6.13.jar");
    assert_eq!(artifact.provider, "modrinth");
    assert_eq!(artifact.dependencies, vec!["P7dR8mSH"]);
    assert_eq!(
      artifact.path,
      temp.path().join("modrinth/fabric/1.21.6/sodium-0.6.13.jar")
    );
    assert_eq!(std::fs::read(&artifact.path).unwrap(), b"sodium-bytes");
  }

  #[tokio::test]
  async fn unknown_project_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/project/nope/version")
      .with_status(404)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let provider = provider(&server, temp.path());
    let err = provider
      .catalog(&ModRequest {
        slug: "nope".to_string(),
        version: None,
      })
      .await
      .unwrap_err();
    assert!(matches!(err, ModError::NotFound { ref slug, .. } if slug == "nope"));
  }

  #[tokio::test]
  async fn no_compatible_version_is_no_match() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();
    server
      .mock("GET", "/project/sodium/version")
      .with_status(200)
      .with_body(json!([version(&url, "0.7.0", &["1.21.7"], &["fabric"])]).to_string())
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let provider = provider(&server, temp.path());
    let err = provider
      .fetch(
        &ModRequest {
          slug: "sodium".to_string(),
          version: None,
        },
        &FetchTarget {
          server: "lobby",
          loader: "forge",
          target_version: "1.21.7",
          force: false,
        },
      )
      .await
      .unwrap_err();
    assert!(matches!(err, ModError::NoMatch { .. }));
  }

  #[tokio::test]
  async fn search_maps_hits() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/search")
      .match_query(mockito::Matcher::UrlEncoded("query".into(), "sodium".into()))
      .with_status(200)
      .with_body(
        json!({"hits": [{"slug": "sodium", "title": "Sodium", "description": "fast", "versions": ["1.21.6"], "downloads": 10}]})
          .to_string(),
      )
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let hits = provider(&server, temp.path()).search("sodium", None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].slug, "sodium");
    assert_eq!(hits[0].downloads, Some(10));
  }
}
