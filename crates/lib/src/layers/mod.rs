//! Layer synchronization.
//!
//! A layer is an external repository checked out under the layers root. Each
//! sync brings one checkout to its declared state:
//!
//! - absent: clone, then checkout branch, then checkout the pinned commit
//! - present: fetch, then one of
//!   - `force`: delete and clone again
//!   - dirty without `update`: leave untouched and record a skip
//!   - `update`: checkout branch and pull, when a branch is declared
//!
//!   followed by the pinned commit, which always wins over a branch tip.
//!
//! Layers are independent: one failing layer never stops its siblings.

pub mod vcs;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, LayerSpec, layer_paths};
use crate::util::cancel::{CancellationToken, cancellable};

pub use vcs::{GitCli, Vcs, VcsError};

#[derive(Debug, Error)]
pub enum LayerSyncError {
  #[error("{op} failed: {source}")]
  Vcs {
    op: &'static str,
    #[source]
    source: VcsError,
  },

  #[error("failed to prepare '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("synchronization cancelled")]
  Cancelled,

  #[error("sync task failed: {0}")]
  Task(String),
}

/// What happened to a layer during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerAction {
  Cloned,
  Recloned,
  Updated,
  Fetched,
  SkippedDirty,
  SkippedNoUrl,
}

impl std::fmt::Display for LayerAction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      LayerAction::Cloned => "cloned",
      LayerAction::Recloned => "re-cloned",
      LayerAction::Updated => "updated",
      LayerAction::Fetched => "fetched",
      LayerAction::SkippedDirty => "skipped (dirty)",
      LayerAction::SkippedNoUrl => "skipped (no url)",
    };
    f.write_str(label)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerOutcome {
  pub name: String,
  pub path: PathBuf,
  pub action: LayerAction,
  pub head: Option<String>,
}

#[derive(Debug)]
pub struct LayerFailure {
  pub layer: String,
  pub error: LayerSyncError,
}

/// Outcomes and failures of one synchronization pass, sorted by layer name.
#[derive(Debug, Default)]
pub struct LayerReport {
  pub outcomes: Vec<LayerOutcome>,
  pub failures: Vec<LayerFailure>,
}

impl LayerReport {
  pub fn skipped(&self) -> impl Iterator<Item = &LayerOutcome> {
    self
      .outcomes
      .iter()
      .filter(|o| matches!(o.action, LayerAction::SkippedDirty | LayerAction::SkippedNoUrl))
  }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
  /// Delete existing checkouts and clone again.
  pub force: bool,
  /// Checkout the branch and pull into existing checkouts.
  pub update: bool,
  pub parallelism: usize,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self {
      force: false,
      update: false,
      parallelism: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4),
    }
  }
}

#[derive(Clone)]
pub struct LayerSynchronizer {
  vcs: Arc<dyn Vcs>,
  root: PathBuf,
  options: SyncOptions,
}

impl std::fmt::Debug for LayerSynchronizer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LayerSynchronizer")
      .field("root", &self.root)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

impl LayerSynchronizer {
  pub fn new(vcs: Arc<dyn Vcs>, root: impl Into<PathBuf>, options: SyncOptions) -> Self {
    Self {
      vcs,
      root: root.into(),
      options,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Synchronize every layer concurrently on a bounded pool.
  ///
  /// Fails only when the declared paths are invalid; per-layer failures are
  /// collected in the report.
  pub async fn sync_all(
    &self,
    layers: &BTreeMap<String, LayerSpec>,
    cancel: &CancellationToken,
  ) -> Result<LayerReport, ConfigError> {
    use tokio::task::JoinSet;

    let paths = layer_paths(layers, &self.root)?;
    if layers.is_empty() {
      info!("no layers declared");
      return Ok(LayerReport::default());
    }

    let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for (name, spec) in layers {
      let this = self.clone();
      let name = name.clone();
      let spec = spec.clone();
      let target = paths.get(&name).cloned().unwrap_or_else(|| self.root.join(&name));
      let semaphore = semaphore.clone();
      let cancel = cancel.clone();

      join_set.spawn(async move {
        let result = match semaphore.acquire_owned().await {
          Ok(_permit) => this.sync_layer_at(&name, &spec, &target, &cancel).await,
          Err(_) => Err(LayerSyncError::Cancelled),
        };
        (name, result)
      });
    }

    let mut report = LayerReport::default();
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((_, Ok(outcome))) => report.outcomes.push(outcome),
        Ok((layer, Err(error))) => {
          error!(layer = %layer, error = %error, "layer sync failed");
          report.failures.push(LayerFailure { layer, error });
        }
        Err(e) => {
          error!(error = %e, "layer task panicked");
          report.failures.push(LayerFailure {
            layer: "<unknown>".to_string(),
            error: LayerSyncError::Task(e.to_string()),
          });
        }
      }
    }

    report.outcomes.sort_by(|a, b| a.name.cmp(&b.name));
    report.failures.sort_by(|a, b| a.layer.cmp(&b.layer));
    Ok(report)
  }

  /// Synchronize one layer at its default location (`root/path` or `root/name`).
  pub async fn sync_layer(
    &self,
    name: &str,
    spec: &LayerSpec,
    cancel: &CancellationToken,
  ) -> Result<LayerOutcome, LayerSyncError> {
    let target = self.root.join(spec.path.as_deref().unwrap_or(name));
    self.sync_layer_at(name, spec, &target, cancel).await
  }

  async fn sync_layer_at(
    &self,
    name: &str,
    spec: &LayerSpec,
    target: &Path,
    cancel: &CancellationToken,
  ) -> Result<LayerOutcome, LayerSyncError> {
    let outcome = |action, head| LayerOutcome {
      name: name.to_string(),
      path: target.to_path_buf(),
      action,
      head,
    };

    let Some(url) = spec.url.as_deref() else {
      warn!(layer = %name, "skipping layer without url");
      return Ok(outcome(LayerAction::SkippedNoUrl, None));
    };

    let action = if !target.exists() {
      debug!(layer = %name, url = %url, path = %target.display(), "cloning layer");
      self.clone_fresh(url, spec, target, cancel).await?;
      LayerAction::Cloned
    } else {
      self.step(cancel, "fetch", self.vcs.fetch(target)).await?;

      if self.options.force {
        info!(layer = %name, path = %target.display(), "force: removing existing checkout");
        tokio::fs::remove_dir_all(target)
          .await
          .map_err(|source| LayerSyncError::Io {
            path: target.to_path_buf(),
            source,
          })?;
        self.clone_fresh(url, spec, target, cancel).await?;
        LayerAction::Recloned
      } else {
        if !self.options.update && self.step(cancel, "status", self.vcs.is_dirty(target)).await? {
          warn!(layer = %name, path = %target.display(), "working tree has local changes, skipping");
          return Ok(outcome(LayerAction::SkippedDirty, self.vcs.head(target).await));
        }

        let action = if self.options.update {
          // Without a branch HEAD is detached; only the commit pin applies.
          if let Some(branch) = spec.branch.as_deref() {
            self.step(cancel, "checkout", self.vcs.checkout(target, branch)).await?;
            self.step(cancel, "pull", self.vcs.pull(target, Some(branch))).await?;
          }
          LayerAction::Updated
        } else {
          LayerAction::Fetched
        };

        if let Some(commit) = spec.commit.as_deref() {
          self.step(cancel, "checkout", self.vcs.checkout(target, commit)).await?;
        }
        action
      }
    };

    let head = self.vcs.head(target).await;
    info!(layer = %name, action = %action, head = head.as_deref().unwrap_or("-"), "layer synchronized");
    Ok(outcome(action, head))
  }

  async fn clone_fresh(
    &self,
    url: &str,
    spec: &LayerSpec,
    target: &Path,
    cancel: &CancellationToken,
  ) -> Result<(), LayerSyncError> {
    if let Some(parent) = target.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| LayerSyncError::Io {
          path: parent.to_path_buf(),
          source,
        })?;
    }

    self.step(cancel, "clone", self.vcs.clone_repo(url, target)).await?;
    if let Some(branch) = spec.branch.as_deref() {
      self.step(cancel, "checkout", self.vcs.checkout(target, branch)).await?;
    }
    if let Some(commit) = spec.commit.as_deref() {
      self.step(cancel, "checkout", self.vcs.checkout(target, commit)).await?;
    }
    Ok(())
  }

  async fn step<T>(
    &self,
    cancel: &CancellationToken,
    op: &'static str,
    fut: impl Future<Output = Result<T, VcsError>>,
  ) -> Result<T, LayerSyncError> {
    cancellable(cancel, fut)
      .await
      .map_err(|_| LayerSyncError::Cancelled)?
      .map_err(|source| LayerSyncError::Vcs { op, source })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::fs;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicBool, Ordering};
  use tempfile::TempDir;

  /// Records every call; `clone_repo` creates the destination directory.
  #[derive(Default)]
  struct FakeVcs {
    calls: Mutex<Vec<String>>,
    dirty: AtomicBool,
    fail_url: Option<String>,
  }

  impl FakeVcs {
    fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }

    fn clear(&self) {
      self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
      self.calls.lock().unwrap().push(call);
    }
  }

  #[async_trait]
  impl Vcs for FakeVcs {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), VcsError> {
      self.record(format!("clone {}", url));
      if self.fail_url.as_deref() == Some(url) {
        return Err(VcsError::Failed {
          command: "git clone".to_string(),
          code: Some(128),
          stderr: "repository not found".to_string(),
        });
      }
      fs::create_dir_all(dest).unwrap();
      fs::write(dest.join("README"), url).unwrap();
      Ok(())
    }

    async fn fetch(&self, _repo: &Path) -> Result<(), VcsError> {
      self.record("fetch".to_string());
      Ok(())
    }

    async fn checkout(&self, _repo: &Path, reference: &str) -> Result<(), VcsError> {
      self.record(format!("checkout {}", reference));
      Ok(())
    }

    async fn pull(&self, _repo: &Path, branch: Option<&str>) -> Result<(), VcsError> {
      self.record(format!("pull {}", branch.unwrap_or("-")));
      Ok(())
    }

    async fn is_dirty(&self, _repo: &Path) -> Result<bool, VcsError> {
      self.record("status".to_string());
      Ok(self.dirty.load(Ordering::SeqCst))
    }

    async fn head(&self, _repo: &Path) -> Option<String> {
      Some("0123abcd".to_string())
    }
  }

  fn layer(url: &str, branch: Option<&str>, commit: Option<&str>) -> LayerSpec {
    LayerSpec {
      url: Some(url.to_string()),
      branch: branch.map(str::to_string),
      commit: commit.map(str::to_string),
      path: None,
    }
  }

  fn synchronizer(vcs: Arc<FakeVcs>, root: &Path, force: bool, update: bool) -> LayerSynchronizer {
    LayerSynchronizer::new(
      vcs,
      root,
      SyncOptions {
        force,
        update,
        parallelism: 2,
      },
    )
  }

  #[tokio::test]
  async fn absent_layer_clones_then_branch_then_commit() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    let sync = synchronizer(vcs.clone(), temp.path(), false, false);

    let outcome = sync
      .sync_layer("base", &layer("u", Some("main"), Some("abc123")), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(outcome.action, LayerAction::Cloned);
    assert_eq!(outcome.path, temp.path().join("base"));
    assert_eq!(vcs.calls(), vec!["clone u", "checkout main", "checkout abc123"]);
  }

  #[tokio::test]
  async fn second_sync_of_clean_layer_only_fetches() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    let sync = synchronizer(vcs.clone(), temp.path(), false, false);
    let spec = layer("u", Some("main"), None);
    let cancel = CancellationToken::new();

    sync.sync_layer("base", &spec, &cancel).await.unwrap();
    let before = fs::read_to_string(temp.path().join("base/README")).unwrap();
    vcs.clear();

    let outcome = sync.sync_layer("base", &spec, &cancel).await.unwrap();

    assert_eq!(outcome.action, LayerAction::Fetched);
    let mutating: Vec<_> = vcs
      .calls()
      .into_iter()
      .filter(|c| c != "fetch" && c != "status")
      .collect();
    assert!(mutating.is_empty(), "unexpected calls: {:?}", mutating);
    assert_eq!(fs::read_to_string(temp.path().join("base/README")).unwrap(), before);
  }

  #[tokio::test]
  async fn dirty_layer_without_update_is_left_alone() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    let sync = synchronizer(vcs.clone(), temp.path(), false, false);
    let spec = layer("u", Some("main"), Some("abc123"));
    let cancel = CancellationToken::new();

    sync.sync_layer("base", &spec, &cancel).await.unwrap();
    fs::write(temp.path().join("base/local.txt"), "wip").unwrap();
    vcs.dirty.store(true, Ordering::SeqCst);
    vcs.clear();

    let outcome = sync.sync_layer("base", &spec, &cancel).await.unwrap();

    assert_eq!(outcome.action, LayerAction::SkippedDirty);
    assert_eq!(vcs.calls(), vec!["fetch", "status"]);
    assert_eq!(fs::read_to_string(temp.path().join("base/local.txt")).unwrap(), "wip");
  }

  #[tokio::test]
  async fn update_pulls_branch_then_pins_commit() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    fs::create_dir_all(temp.path().join("base")).unwrap();
    let sync = synchronizer(vcs.clone(), temp.path(), false, true);

    let outcome = sync
      .sync_layer("base", &layer("u", Some("dev"), Some("abc123")), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(outcome.action, LayerAction::Updated);
    assert_eq!(vcs.calls(), vec!["fetch", "checkout dev", "pull dev", "checkout abc123"]);
  }

  #[tokio::test]
  async fn update_without_branch_pins_commit_without_pulling() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    fs::create_dir_all(temp.path().join("base")).unwrap();
    let sync = synchronizer(vcs.clone(), temp.path(), false, true);

    let outcome = sync
      .sync_layer("base", &layer("u", None, Some("abc123")), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(outcome.action, LayerAction::Updated);
    assert_eq!(vcs.calls(), vec!["fetch", "checkout abc123"]);
    assert!(!vcs.calls().iter().any(|c| c.starts_with("pull")));
  }

  #[tokio::test]
  async fn clean_layer_without_update_still_pins_commit() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    fs::create_dir_all(temp.path().join("base")).unwrap();
    let sync = synchronizer(vcs.clone(), temp.path(), false, false);

    sync
      .sync_layer("base", &layer("u", None, Some("abc123")), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(vcs.calls(), vec!["fetch", "status", "checkout abc123"]);
  }

  #[tokio::test]
  async fn force_deletes_and_reclones() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    let checkout = temp.path().join("base");
    fs::create_dir_all(&checkout).unwrap();
    fs::write(checkout.join("stale.txt"), "old").unwrap();
    let sync = synchronizer(vcs.clone(), temp.path(), true, false);

    let outcome = sync
      .sync_layer("base", &layer("u", Some("main"), None), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(outcome.action, LayerAction::Recloned);
    assert!(!checkout.join("stale.txt").exists());
    assert_eq!(vcs.calls(), vec!["fetch", "clone u", "checkout main"]);
  }

  #[tokio::test]
  async fn layer_without_url_is_skipped() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    let sync = synchronizer(vcs.clone(), temp.path(), false, false);

    let outcome = sync
      .sync_layer("empty", &LayerSpec::default(), &CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(outcome.action, LayerAction::SkippedNoUrl);
    assert!(vcs.calls().is_empty());
  }

  #[tokio::test]
  async fn one_failing_layer_does_not_stop_siblings() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs {
      fail_url: Some("bad".to_string()),
      ..Default::default()
    });
    let sync = synchronizer(vcs.clone(), temp.path(), false, false);
    let layers = BTreeMap::from([
      ("a".to_string(), layer("good-a", None, None)),
      ("b".to_string(), layer("bad", None, None)),
      ("c".to_string(), layer("good-c", None, None)),
    ]);

    let report = sync.sync_all(&layers, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].layer, "b");
    assert!(temp.path().join("a").exists());
    assert!(temp.path().join("c").exists());
  }

  #[tokio::test]
  async fn cancelled_token_aborts_layer() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    let sync = synchronizer(vcs.clone(), temp.path(), false, false);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = sync
      .sync_layer("base", &layer("u", None, None), &cancel)
      .await
      .unwrap_err();

    assert!(matches!(err, LayerSyncError::Cancelled));
    assert!(vcs.calls().is_empty());
  }

  #[tokio::test]
  async fn colliding_paths_are_rejected_before_any_call() {
    let temp = TempDir::new().unwrap();
    let vcs = Arc::new(FakeVcs::default());
    let sync = synchronizer(vcs.clone(), temp.path(), false, false);
    let mut a = layer("u", None, None);
    a.path = Some("shared".to_string());
    let b = a.clone();
    let layers = BTreeMap::from([("a".to_string(), a), ("b".to_string(), b)]);

    assert!(sync.sync_all(&layers, &CancellationToken::new()).await.is_err());
    assert!(vcs.calls().is_empty());
  }
}
