//! Version-control client used by the layer synchronizer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::env::{CraftEnv, SSH_PRIVATE_KEY};

#[derive(Debug, Error)]
pub enum VcsError {
  #[error("failed to spawn '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("'{command}' exited with {}: {stderr}", exit_label(.code))]
  Failed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },
}

fn exit_label(code: &Option<i32>) -> String {
  code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
}

/// Operations the synchronizer needs from a version-control client.
#[async_trait]
pub trait Vcs: Send + Sync {
  async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), VcsError>;

  async fn fetch(&self, repo: &Path) -> Result<(), VcsError>;

  /// Check out a branch, tag, or commit.
  async fn checkout(&self, repo: &Path, reference: &str) -> Result<(), VcsError>;

  /// Pull `branch` from the default remote, or the tracked branch when `None`.
  async fn pull(&self, repo: &Path, branch: Option<&str>) -> Result<(), VcsError>;

  /// True when the working tree has uncommitted or untracked changes.
  async fn is_dirty(&self, repo: &Path) -> Result<bool, VcsError>;

  /// Commit id of HEAD, if the repository can be read.
  async fn head(&self, repo: &Path) -> Option<String>;
}

/// [`Vcs`] backed by the `git` binary.
///
/// Every child process is killed when its future is dropped, so a cancelled
/// sync never leaves a clone running in the background.
#[derive(Debug, Clone, Default)]
pub struct GitCli {
  ssh_key: Option<PathBuf>,
}

impl GitCli {
  pub fn new(ssh_key: Option<PathBuf>) -> Self {
    Self { ssh_key }
  }

  pub fn from_env(env: &CraftEnv) -> Self {
    Self::new(env.get(SSH_PRIVATE_KEY).map(PathBuf::from))
  }

  /// Value for `GIT_SSH_COMMAND` when a private key is configured.
  pub fn ssh_command(&self) -> Option<String> {
    self
      .ssh_key
      .as_ref()
      .map(|key| format!("ssh -i {} -o IdentitiesOnly=yes", key.display()))
  }

  async fn git(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, VcsError> {
    let mut command = Command::new("git");
    command
      .args(args)
      .env("GIT_TERMINAL_PROMPT", "0")
      .kill_on_drop(true);
    if let Some(cwd) = cwd {
      command.current_dir(cwd);
    }
    if let Some(ssh) = self.ssh_command() {
      command.env("GIT_SSH_COMMAND", ssh);
    }

    let rendered = format!("git {}", args.join(" "));
    debug!(command = %rendered, cwd = ?cwd, "running git");

    let output = command.output().await.map_err(|source| VcsError::Spawn {
      program: "git".to_string(),
      source,
    })?;

    if !output.status.success() {
      return Err(VcsError::Failed {
        command: rendered,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}

#[async_trait]
impl Vcs for GitCli {
  async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), VcsError> {
    let dest = dest.to_string_lossy();
    self.git(None, &clone_args(url, &dest)).await.map(drop)
  }

  async fn fetch(&self, repo: &Path) -> Result<(), VcsError> {
    self.git(Some(repo), &["fetch", "--prune", "origin"]).await.map(drop)
  }

  async fn checkout(&self, repo: &Path, reference: &str) -> Result<(), VcsError> {
    self.git(Some(repo), &checkout_args(reference)).await.map(drop)
  }

  async fn pull(&self, repo: &Path, branch: Option<&str>) -> Result<(), VcsError> {
    match branch {
      Some(branch) => self
        .git(Some(repo), &["pull", "--end-of-options", "origin", branch])
        .await
        .map(drop),
      None => self.git(Some(repo), &["pull"]).await.map(drop),
    }
  }

  async fn is_dirty(&self, repo: &Path) -> Result<bool, VcsError> {
    let status = self.git(Some(repo), &["status", "--porcelain"]).await?;
    Ok(!status.trim().is_empty())
  }

  async fn head(&self, repo: &Path) -> Option<String> {
    let repo = repo.to_path_buf();
    tokio::task::spawn_blocking(move || head_commit(&repo)).await.ok()?
  }
}

// User-supplied urls and refs follow `--end-of-options` so a leading `-` is
// never read as a flag.
fn clone_args<'a>(url: &'a str, dest: &'a str) -> [&'a str; 4] {
  ["clone", "--end-of-options", url, dest]
}

fn checkout_args(reference: &str) -> [&str; 3] {
  ["checkout", "--end-of-options", reference]
}

fn head_commit(repo: &Path) -> Option<String> {
  let repo = gix::open(repo).ok()?;
  let mut head = repo.head().ok()?;
  let commit = head.peel_to_commit().ok()?;
  Some(commit.id.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn ssh_command_uses_private_key() {
    let git = GitCli::new(Some(PathBuf::from("/keys/deploy")));
    assert_eq!(
      git.ssh_command().as_deref(),
      Some("ssh -i /keys/deploy -o IdentitiesOnly=yes")
    );
    assert!(GitCli::default().ssh_command().is_none());
  }

  #[test]
  fn from_env_reads_key() {
    let env = CraftEnv::from_vars([(SSH_PRIVATE_KEY, "/keys/id")], Path::new("/"));
    assert!(GitCli::from_env(&env).ssh_command().is_some());
  }

  #[test]
  fn option_like_urls_and_refs_stay_operands() {
    assert_eq!(
      clone_args("--upload-pack=touch /tmp/x", "/layers/base"),
      ["clone", "--end-of-options", "--upload-pack=touch /tmp/x", "/layers/base"]
    );
    assert_eq!(checkout_args("-b"), ["checkout", "--end-of-options", "-b"]);
  }

  #[tokio::test]
  async fn head_of_non_repository_is_none() {
    let temp = TempDir::new().unwrap();
    assert!(GitCli::default().head(temp.path()).await.is_none());
  }

  #[test]
  fn failure_message_names_exit_code() {
    let err = VcsError::Failed {
      command: "git fetch".to_string(),
      code: Some(128),
      stderr: "fatal: not a git repository".to_string(),
    };
    assert_eq!(
      err.to_string(),
      "'git fetch' exited with 128: fatal: not a git repository"
    );
  }
}
