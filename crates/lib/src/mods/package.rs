//! Package groups: an archive of artifact files plus a manifest and a pointer
//! file for consumers that only fetch published groups.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use super::{ModError, ResolvedModArtifact};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackagedGroup {
  pub archive: PathBuf,
  pub manifest: PathBuf,
  pub pointer: PathBuf,
}

/// Write `{group}.zip`, `{group}_packagegroup.json` and `{group}.mcpkg` into
/// `output_dir`.
///
/// The manifest lists every record in input order. Every backing file must
/// exist before anything is written.
pub fn package_group(
  artifacts: &[ResolvedModArtifact],
  output_dir: &Path,
  group: &str,
  repo_url: &str,
) -> Result<PackagedGroup, ModError> {
  if let Some(missing) = artifacts.iter().find(|a| !a.path.is_file()) {
    return Err(ModError::MissingFile(missing.path.clone()));
  }
  fs::create_dir_all(output_dir).map_err(ModError::io(output_dir))?;

  let archive = output_dir.join(format!("{}.zip", group));
  write_archive(artifacts, &archive)?;
  info!(path = %archive.display(), files = artifacts.len(), "wrote package archive");

  let manifest = output_dir.join(format!("{}_packagegroup.json", group));
  let json = serde_json::to_vec_pretty(artifacts)?;
  fs::write(&manifest, json).map_err(ModError::io(&manifest))?;
  info!(path = %manifest.display(), "wrote package manifest");

  let pointer = output_dir.join(format!("{}.mcpkg", group));
  let line = format!("{}/{}_packagegroup.json\n", repo_url.trim_end_matches('/'), group);
  fs::write(&pointer, line).map_err(ModError::io(&pointer))?;

  Ok(PackagedGroup {
    archive,
    manifest,
    pointer,
  })
}

fn write_archive(artifacts: &[ResolvedModArtifact], archive: &Path) -> Result<(), ModError> {
  let zip_err = |e: zip::result::ZipError| ModError::Package {
    path: archive.to_path_buf(),
    message: e.to_string(),
  };

  let file = File::create(archive).map_err(ModError::io(archive))?;
  let mut zip = ZipWriter::new(file);
  let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

  let mut seen = HashSet::new();
  for artifact in artifacts {
    if !seen.insert(artifact.file_name.as_str()) {
      warn!(file = %artifact.file_name, "duplicate file name in package group, keeping the first");
      continue;
    }
    zip.start_file(artifact.file_name.as_str(), options).map_err(zip_err)?;
    let mut source = File::open(&artifact.path).map_err(ModError::io(&artifact.path))?;
    io::copy(&mut source, &mut zip).map_err(ModError::io(&artifact.path))?;
  }

  let mut file = zip.finish().map_err(zip_err)?;
  file.flush().map_err(ModError::io(archive))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::hash::hash_bytes;
  use std::io::Read;
  use tempfile::TempDir;

  fn artifact(dir: &Path, name: &str) -> ResolvedModArtifact {
    let file_name = format!("{}.jar", name);
    let path = dir.join(&file_name);
    fs::write(&path, name).unwrap();
    ResolvedModArtifact {
      name: name.to_string(),
      version: "1.0.0".to_string(),
      loader: "fabric".to_string(),
      target_version: "1.21.6".to_string(),
      file_name,
      source: format!("https://cdn.example.com/{}.jar", name),
      sha512: hash_bytes(name.as_bytes()),
      timestamp: 1_700_000_000,
      provider: "modrinth".to_string(),
      dependencies: vec![],
      path,
    }
  }

  #[test]
  fn packages_three_artifacts_in_input_order() {
    let temp = TempDir::new().unwrap();
    let artifacts: Vec<_> = ["sodium", "lithium", "fabric-api"]
      .iter()
      .map(|n| artifact(temp.path(), n))
      .collect();
    let out = temp.path().join("out");

    let group = package_group(&artifacts, &out, "lobby", "https://repo.example.com/").unwrap();

    let mut zip = zip::ZipArchive::new(File::open(&group.archive).unwrap()).unwrap();
    let mut names: Vec<_> = zip.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, vec!["fabric-api.jar", "lithium.jar", "sodium.jar"]);

    let mut content = String::new();
    zip.by_name("lithium.jar").unwrap().read_to_string(&mut content).unwrap();
    assert_eq!(content, "lithium");

    let manifest: Vec<ResolvedModArtifact> =
      serde_json::from_slice(&fs::read(&group.manifest).unwrap()).unwrap();
    assert_eq!(manifest, artifacts);

    assert_eq!(
      fs::read_to_string(&group.pointer).unwrap(),
      "https://repo.example.com/lobby_packagegroup.json\n"
    );
    assert!(group.manifest.ends_with("lobby_packagegroup.json"));
  }

  #[test]
  fn missing_backing_file_fails_before_writing() {
    let temp = TempDir::new().unwrap();
    let mut gone = artifact(temp.path(), "gone");
    fs::remove_file(&gone.path).unwrap();
    gone.path = temp.path().join("gone.jar");
    let out = temp.path().join("out");

    let err = package_group(&[gone], &out, "g", "https://repo").unwrap_err();
    assert!(matches!(err, ModError::MissingFile(_)));
    assert!(!out.exists());
  }
}
