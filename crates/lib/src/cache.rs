//! On-disk key to bytes store.
//!
//! Keys are relative, `/`-separated paths below the cache root. Writes go to a
//! temporary file in the destination directory and are renamed into place, so
//! readers never observe a half-written entry. Concurrent writers to the same
//! key race benignly: entries are derived deterministically from their key, so
//! whichever rename lands last leaves identical bytes.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, trace};

use crate::util::fs::is_contained;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("invalid cache key '{0}'")]
  InvalidKey(String),

  #[error("failed to read cache entry '{key}': {source}")]
  Read {
    key: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to write cache entry '{key}': {source}")]
  Write {
    key: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to decode cache entry '{key}': {source}")]
  Decode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Clone)]
pub struct Cache {
  root: PathBuf,
}

impl Cache {
  /// Open a cache rooted at `root`. The directory is created lazily on write.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    debug!(root = %root.display(), "initialized cache");
    Self { root }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Filesystem path for `key`.
  pub fn path(&self, key: &str) -> Result<PathBuf, CacheError> {
    let rel = Path::new(key);
    if key.is_empty() || !is_contained(rel) {
      return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(self.root.join(rel))
  }

  pub fn has(&self, key: &str) -> bool {
    let exists = self.path(key).map(|p| p.is_file()).unwrap_or(false);
    trace!(key, hit = exists, "cache lookup");
    exists
  }

  pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
    let path = self.path(key)?;
    match fs::read(&path) {
      Ok(bytes) => {
        debug!(key, "cache hit");
        Ok(Some(bytes))
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(key, "cache miss");
        Ok(None)
      }
      Err(source) => Err(CacheError::Read {
        key: key.to_string(),
        source,
      }),
    }
  }

  pub fn set(&self, key: &str, data: &[u8]) -> Result<PathBuf, CacheError> {
    let path = self.path(key)?;
    let write_err = |source| CacheError::Write {
      key: key.to_string(),
      source,
    };

    let dir = path.parent().unwrap_or(&self.root);
    fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::Builder::new()
      .prefix(".entry")
      .suffix(".tmp")
      .tempfile_in(dir)
      .map_err(write_err)?;
    tmp.write_all(data).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    debug!(key, bytes = data.len(), "wrote cache entry");
    Ok(path)
  }

  pub fn remove(&self, key: &str) -> Result<(), CacheError> {
    let path = self.path(key)?;
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(CacheError::Write {
        key: key.to_string(),
        source,
      }),
    }
  }

  pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
    let Some(bytes) = self.get(key)? else {
      return Ok(None);
    };
    serde_json::from_slice(&bytes)
      .map(Some)
      .map_err(|source| CacheError::Decode {
        key: key.to_string(),
        source,
      })
  }

  pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<PathBuf, CacheError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| CacheError::Decode {
      key: key.to_string(),
      source,
    })?;
    self.set(key, &bytes)
  }
}
