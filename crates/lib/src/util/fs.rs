//! Filesystem helpers.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::WalkDir;

/// Expand a leading `~` and resolve relative paths against `base`.
///
/// Without a home directory `~` is kept literally.
pub fn expand_path(raw: &str, base: &Path) -> PathBuf {
  let expanded = match (raw.strip_prefix("~/"), dirs::home_dir()) {
    (Some(rest), Some(home)) => home.join(rest),
    (None, Some(home)) if raw == "~" => home,
    _ => PathBuf::from(raw),
  };

  if expanded.is_absolute() {
    expanded
  } else {
    base.join(expanded)
  }
}

/// True when `relative` has no root, prefix, or `..` components.
pub fn is_contained(relative: &Path) -> bool {
  relative
    .components()
    .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Copy a file or a directory tree to `dest`.
///
/// Directories are copied recursively; existing files at the destination are
/// overwritten.
pub fn copy_recursively(src: &Path, dest: &Path) -> io::Result<u64> {
  if src.is_file() {
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::copy(src, dest)?;
    return Ok(1);
  }

  let mut copied = 0;
  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(rel);
    if entry.file_type().is_dir() {
      fs::create_dir_all(&target)?;
    } else if entry.file_type().is_file() {
      fs::copy(entry.path(), &target)?;
      copied += 1;
    }
  }
  Ok(copied)
}

/// Seconds since the Unix epoch.
pub fn now_unix() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  #[test]
  fn relative_paths_join_base() {
    assert_eq!(
      expand_path("conf/a.yml", Path::new("/etc/craft")),
      PathBuf::from("/etc/craft/conf/a.yml")
    );
  }

  #[test]
  #[serial]
  fn tilde_expands_to_home() {
    let home = TempDir::new().unwrap();
    temp_env::with_var("HOME", Some(home.path()), || {
      assert_eq!(
        expand_path("~/worlds/lobby.zip", Path::new("/srv")),
        home.path().join("worlds/lobby.zip")
      );
      assert_eq!(expand_path("~", Path::new("/srv")), home.path());
      assert_eq!(expand_path("~other", Path::new("/srv")), PathBuf::from("/srv/~other"));
    });
  }

  #[test]
  fn absolute_paths_are_kept() {
    assert_eq!(expand_path("/opt/a.yml", Path::new("/etc")), PathBuf::from("/opt/a.yml"));
  }

  #[test]
  fn containment_rejects_escapes() {
    assert!(is_contained(Path::new("a/b")));
    assert!(is_contained(Path::new("./a")));
    assert!(!is_contained(Path::new("../a")));
    assert!(!is_contained(Path::new("/abs")));
    assert!(!is_contained(Path::new("a/../../b")));
  }

  #[test]
  fn copies_nested_directories() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    fs::create_dir_all(src.join("nested")).unwrap();
    fs::write(src.join("top.txt"), "top").unwrap();
    fs::write(src.join("nested/inner.txt"), "inner").unwrap();

    let dest = temp.path().join("dest");
    let copied = copy_recursively(&src, &dest).unwrap();

    assert_eq!(copied, 2);
    assert_eq!(fs::read_to_string(dest.join("nested/inner.txt")).unwrap(), "inner");
  }

  #[test]
  fn copies_single_file() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("server.properties");
    fs::write(&src, "motd=hi").unwrap();
    let dest = temp.path().join("out/server.properties");
    assert_eq!(copy_recursively(&src, &dest).unwrap(), 1);
    assert!(dest.exists());
  }
}
