//! Hashing utilities for cache keys and artifact integrity.
//!
//! This module provides:
//! - `ObjectHash`: A truncated 20-character hash used to derive cache keys
//! - `ContentHash`: A full SHA-512 hash recorded for downloaded artifacts
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::consts::OBJ_HASH_PREFIX_LEN;

pub type HashError = serde_json::Error;

/// A hash identifying a serializable value.
///
/// The hash is a 20-character truncated SHA-256 of the JSON-serialized value.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string, e.g., `"a1b2c3d4e5f6789012ab"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    let full = format!("{:x}", hasher.finalize());
    Ok(ObjectHash(full[..OBJ_HASH_PREFIX_LEN].to_string()))
  }
}

/// A full SHA-512 hash for artifact verification.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (128 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Incremental SHA-512 for content that arrives in chunks.
#[derive(Default)]
pub struct StreamHasher(Sha512);

impl StreamHasher {
  pub fn new() -> Self {
    Self(Sha512::new())
  }

  pub fn update(&mut self, chunk: &[u8]) {
    self.0.update(chunk);
  }

  pub fn finish(self) -> ContentHash {
    ContentHash(hex::encode(self.0.finalize()))
  }
}

/// Hash a file's contents.
///
/// Returns the full SHA-512 hash of the file.
pub fn hash_file(path: &Path) -> std::io::Result<ContentHash> {
  let mut file = fs::File::open(path)?;
  let mut hasher = StreamHasher::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hasher.finish())
}

/// Hash arbitrary bytes.
///
/// Returns the full SHA-512 hash.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = StreamHasher::new();
  hasher.update(data);
  hasher.finish()
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[derive(Serialize)]
  struct Key<'a> {
    provider: &'a str,
    slug: &'a str,
  }

  impl Hashable for Key<'_> {}

  #[test]
  fn object_hash_is_truncated_and_stable() {
    let a = Key {
      provider: "modrinth",
      slug: "sodium",
    };
    let h1 = a.compute_hash().unwrap();
    let h2 = a.compute_hash().unwrap();
    assert_eq!(h1, h2);
    assert_eq!(h1.0.len(), OBJ_HASH_PREFIX_LEN);
  }

  #[test]
  fn object_hash_differs_by_field() {
    let a = Key {
      provider: "modrinth",
      slug: "sodium",
    };
    let b = Key {
      provider: "hangar",
      slug: "sodium",
    };
    assert_ne!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
  }

  #[test]
  fn hash_file_matches_hash_bytes() {
    let temp = tempdir().unwrap();
    let file_path = temp.path().join("mod.jar");
    fs::write(&file_path, b"hello world").unwrap();

    let from_file = hash_file(&file_path).unwrap();
    assert_eq!(from_file.0.len(), 128);
    assert_eq!(from_file, hash_bytes(b"hello world"));
  }

  #[test]
  fn stream_hasher_is_chunking_independent() {
    let mut hasher = StreamHasher::new();
    hasher.update(b"hello ");
    hasher.update(b"world");
    assert_eq!(hasher.finish(), hash_bytes(b"hello world"));
  }

  #[test]
  fn known_sha512_vector() {
    assert_eq!(
      hash_bytes(b"abc").0,
      "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
       2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
    );
  }
}
