//! Artifact downloads.
//!
//! Files are streamed into a temporary file next to their destination and
//! renamed into place once the body has been fully received. The temporary
//! file is deleted when the download future is dropped, so a cancelled or
//! failed download never leaves a partial file that looks like a cache hit.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::ModError;
use crate::consts::USER_AGENT;
use crate::util::fs::is_contained;
use crate::util::hash::{ContentHash, StreamHasher};

/// Build the HTTP client shared by every provider.
pub fn http_client() -> Result<reqwest::Client, ModError> {
  reqwest::Client::builder()
    .user_agent(USER_AGENT)
    .build()
    .map_err(|source| ModError::Http {
      url: String::new(),
      source,
    })
}

#[derive(Debug, Clone)]
pub struct Downloader {
  client: reqwest::Client,
  root: PathBuf,
}

impl Downloader {
  pub fn new(client: reqwest::Client, root: impl Into<PathBuf>) -> Self {
    Self {
      client,
      root: root.into(),
    }
  }

  pub fn client(&self) -> &reqwest::Client {
    &self.client
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// `root/provider/loader/target_version/file_name`.
  pub fn artifact_path(
    &self,
    provider: &str,
    loader: &str,
    target_version: &str,
    file_name: &str,
  ) -> Result<PathBuf, ModError> {
    for part in [provider, loader, target_version, file_name] {
      let single = Path::new(part).components().count() == 1;
      if part.is_empty() || !single || !is_contained(Path::new(part)) {
        return Err(ModError::InvalidDeclaration {
          provider: provider.to_string(),
          entry: file_name.to_string(),
          message: format!("'{}' is not a valid path component", part),
        });
      }
    }
    Ok(
      self
        .root
        .join(provider)
        .join(loader.to_lowercase())
        .join(target_version)
        .join(file_name),
    )
  }

  /// Stream `url` to `dest`, returning the SHA-512 of the received bytes.
  pub async fn download(&self, url: &str, dest: &Path) -> Result<ContentHash, ModError> {
    info!(url = %url, path = %dest.display(), "downloading");

    let http_err = |source| ModError::Http {
      url: url.to_string(),
      source,
    };

    let mut response = self.client.get(url).send().await.map_err(http_err)?;
    if !response.status().is_success() {
      return Err(ModError::Status {
        url: url.to_string(),
        status: response.status().as_u16(),
      });
    }

    let dir = dest.parent().unwrap_or(&self.root).to_path_buf();
    tokio::fs::create_dir_all(&dir).await.map_err(ModError::io(&dir))?;

    let temp = tempfile::Builder::new()
      .prefix(".download")
      .suffix(".part")
      .tempfile_in(&dir)
      .map_err(ModError::io(&dir))?;
    let (file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut hasher = StreamHasher::new();
    let mut size: u64 = 0;
    while let Some(chunk) = response.chunk().await.map_err(http_err)? {
      hasher.update(&chunk);
      size += chunk.len() as u64;
      file.write_all(&chunk).await.map_err(ModError::io(dest))?;
    }
    file.flush().await.map_err(ModError::io(dest))?;
    drop(file);

    temp_path.persist(dest).map_err(|e| ModError::Io {
      path: dest.to_path_buf(),
      source: e.error,
    })?;

    let digest = hasher.finish();
    debug!(path = %dest.display(), size, sha512 = %digest, "download complete");
    Ok(digest)
  }
}

/// File name from the last path segment of a URL, query string removed.
pub fn file_name_from_url(url: &str) -> Option<String> {
  let last = url.split(['?', '#']).next()?.trim_end_matches('/').rsplit('/').next()?;
  let sanitized: String = last
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '+') {
        c
      } else {
        '_'
      }
    })
    .collect();
  let trimmed = sanitized.trim_matches('.');
  if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}
