//! Build context assembly.
//!
//! Every server in the merged configuration becomes a build target with its
//! own directory under the build root:
//!
//! ```text
//! build/<name>/
//!   mods/            resolved artifacts, copied by file name
//!   config/          declared config files and directories
//!   entry_point.sh   optional
//!   Dockerfile       rendered descriptor
//! ```
//!
//! Targets are assembled concurrently; the steps of one target run in order.
//! A failing target never stops its siblings.
//!
//! # Submodules
//!
//! - [`docker`] - Container engine collaborator and run specs
//! - [`modloader`] - Server jar fetch and install commands per loader
//! - [`template`] - Descriptor rendering

pub mod docker;
pub mod modloader;
pub mod template;

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{MergedConfig, ServerSpec};
use crate::consts::{DESCRIPTOR_FILENAME, ENTRY_POINT_FILENAME};
use crate::env::{CraftEnv, MC_VERSION};
use crate::mods::{ModReport, ResolvedModArtifact};
use crate::util::cancel::{CancellationToken, cancellable};
use crate::util::fs::{copy_recursively, is_contained};

pub use docker::{DockerCli, ExternalToolError, ImageBuilder, RunSpec};
pub use modloader::{Modloader, ModloaderRegistry};
pub use template::{DOCKERFILE_TEMPLATE, MiniJinjaRenderer, TemplateRenderer};

#[derive(Debug, Error)]
pub enum BuildAssemblyError {
  #[error("unknown modloader '{0}'")]
  UnknownModloader(String),

  #[error("modloader '{loader}' does not support {version} (supported: {})", .supported.join(", "))]
  UnsupportedVersion {
    loader: String,
    version: String,
    supported: Vec<String>,
  },

  #[error("target '{target}' has no target version (set MC_VERSION)")]
  MissingTargetVersion { target: String },

  #[error("'{0}' is not a valid target name")]
  InvalidTargetName(String),

  #[error("target '{target}' would replace '{path}'")]
  ReservedDirectory { target: String, path: PathBuf },

  #[error("target '{target}' stages both '{}' and '{}' as config/{name}", .first.display(), .second.display())]
  ConfigCollision {
    target: String,
    name: String,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("failed to render template '{template}': {message}")]
  Render { template: String, message: String },

  #[error("I/O error on '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Tool(#[from] ExternalToolError),

  #[error("assembly cancelled")]
  Cancelled,

  #[error("assembly task failed: {0}")]
  Task(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BuildAssemblyError {
  let path = path.to_path_buf();
  move |source| BuildAssemblyError::Io { path, source }
}

#[derive(Debug, Clone)]
pub struct AssembleOptions {
  /// Hand each assembled directory to the image builder.
  pub build_images: bool,
  pub parallelism: usize,
}

impl Default for AssembleOptions {
  fn default() -> Self {
    Self {
      build_images: true,
      parallelism: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4),
    }
  }
}

/// A target whose directory and descriptor were written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssembledTarget {
  pub name: String,
  pub dir: PathBuf,
  pub descriptor: PathBuf,
  pub tag: String,
  /// File names copied into `mods/`.
  pub mods: Vec<String>,
  /// Names copied into `config/`.
  pub config_files: Vec<String>,
  pub entry_point: bool,
  pub built: bool,
}

#[derive(Debug)]
pub struct TargetFailure {
  pub target: String,
  pub error: BuildAssemblyError,
}

#[derive(Debug, Default)]
pub struct AssemblyReport {
  pub targets: Vec<AssembledTarget>,
  pub failures: Vec<TargetFailure>,
}

/// Everything one target needs, detached from the configuration.
#[derive(Debug, Clone)]
struct TargetInput {
  name: String,
  dir: PathBuf,
  spec: ServerSpec,
  env: BTreeMap<String, String>,
  config_files: Vec<PathBuf>,
  entry_point: Option<PathBuf>,
  artifacts: Vec<ResolvedModArtifact>,
}

/// Result of populating a target directory.
#[derive(Debug, Default)]
struct Staged {
  mods: Vec<String>,
  config_files: Vec<String>,
  entry_point: bool,
}

#[derive(Clone)]
pub struct BuildContextAssembler {
  renderer: Arc<dyn TemplateRenderer>,
  builder: Arc<dyn ImageBuilder>,
  modloaders: Arc<ModloaderRegistry>,
  options: AssembleOptions,
}

impl std::fmt::Debug for BuildContextAssembler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildContextAssembler")
      .field("modloaders", &self.modloaders)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

impl BuildContextAssembler {
  pub fn new(
    renderer: Arc<dyn TemplateRenderer>,
    builder: Arc<dyn ImageBuilder>,
    modloaders: Arc<ModloaderRegistry>,
    options: AssembleOptions,
  ) -> Self {
    Self {
      renderer,
      builder,
      modloaders,
      options,
    }
  }

  /// Assemble every server in `config`.
  pub async fn assemble_all(
    &self,
    config: &MergedConfig,
    env: &CraftEnv,
    mods: &ModReport,
    cancel: &CancellationToken,
  ) -> AssemblyReport {
    let mut report = AssemblyReport::default();
    let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for name in config.servers().keys() {
      let input = match self.input(name, config, env, mods.for_server(name)) {
        Ok(input) => input,
        Err(error) => {
          error!(target = %name, error = %error, "target rejected");
          report.failures.push(TargetFailure {
            target: name.clone(),
            error,
          });
          continue;
        }
      };
      let this = self.clone();
      let semaphore = semaphore.clone();
      let cancel = cancel.clone();

      join_set.spawn(async move {
        let result = match semaphore.acquire_owned().await {
          Ok(_permit) => this.assemble_input(&input, &cancel).await,
          Err(_) => Err(BuildAssemblyError::Cancelled),
        };
        (input.name, result)
      });
    }

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((_, Ok(target))) => report.targets.push(target),
        Ok((target, Err(error))) => {
          error!(target = %target, error = %error, "target assembly failed");
          report.failures.push(TargetFailure { target, error });
        }
        Err(e) => {
          error!(error = %e, "assembly task panicked");
          report.failures.push(TargetFailure {
            target: "<unknown>".to_string(),
            error: BuildAssemblyError::Task(e.to_string()),
          });
        }
      }
    }

    report.targets.sort_by(|a, b| a.name.cmp(&b.name));
    report.failures.sort_by(|a, b| a.target.cmp(&b.target));
    report
  }

  /// Assemble a single server with the given resolved artifacts.
  pub async fn assemble(
    &self,
    name: &str,
    config: &MergedConfig,
    env: &CraftEnv,
    artifacts: &[ResolvedModArtifact],
    cancel: &CancellationToken,
  ) -> Result<AssembledTarget, BuildAssemblyError> {
    let input = self.input(name, config, env, artifacts)?;
    self.assemble_input(&input, cancel).await
  }

  fn input(
    &self,
    name: &str,
    config: &MergedConfig,
    env: &CraftEnv,
    artifacts: &[ResolvedModArtifact],
  ) -> Result<TargetInput, BuildAssemblyError> {
    let spec = config
      .server(name)
      .ok_or_else(|| BuildAssemblyError::InvalidTargetName(name.to_string()))?;

    let single = Path::new(name).components().count() == 1;
    if name.is_empty() || !single || !is_contained(Path::new(name)) {
      return Err(BuildAssemblyError::InvalidTargetName(name.to_string()));
    }

    let root = config.build_dir(env);
    let dir = root.join(name);
    let layers = config.layers_dir(env);
    if layers.starts_with(&dir) {
      return Err(BuildAssemblyError::ReservedDirectory {
        target: name.to_string(),
        path: layers,
      });
    }
    if dir == root.join("worlds") {
      return Err(BuildAssemblyError::ReservedDirectory {
        target: name.to_string(),
        path: dir,
      });
    }

    Ok(TargetInput {
      name: name.to_string(),
      dir,
      env: spec.merged_env(config.defaults()),
      config_files: spec
        .config_files
        .iter()
        .map(|raw| config.resolve_path(raw, env))
        .collect(),
      entry_point: spec.entry_point.as_deref().map(|raw| config.resolve_path(raw, env)),
      artifacts: artifacts.to_vec(),
      spec: spec.clone(),
    })
  }

  async fn assemble_input(
    &self,
    input: &TargetInput,
    cancel: &CancellationToken,
  ) -> Result<AssembledTarget, BuildAssemblyError> {
    let name = input.name.as_str();
    let target_version = input
      .env
      .get(MC_VERSION)
      .ok_or_else(|| BuildAssemblyError::MissingTargetVersion {
        target: name.to_string(),
      })?;

    let commands = match input.spec.modloader.as_deref() {
      Some(loader_name) => {
        let loader = self.modloaders.get(loader_name)?;
        Some((
          loader.name(),
          loader.fetch_command(target_version)?,
          loader.install_command(target_version)?,
        ))
      }
      None => None,
    };

    let staged = {
      let input = input.clone();
      let span = tracing::Span::current();
      tokio::task::spawn_blocking(move || span.in_scope(|| stage(&input)))
        .await
        .map_err(|e| BuildAssemblyError::Task(e.to_string()))??
    };

    let (modloader, fetch, install) = match commands {
      Some((loader, fetch, install)) => (Some(loader), Some(fetch), Some(install)),
      None => (None, None, None),
    };
    let bindings = json!({
      "name": name,
      "parent_image": input.spec.parent_image,
      "env": input.env,
      "server_dir": modloader::SERVER_DIR,
      "target_version": target_version,
      "modloader": modloader,
      "modloader_fetch_command": fetch,
      "modloader_install_command": install,
      "mods": staged.mods,
      "plugins": input.spec.plugins,
      "config_files": staged.config_files,
      "entry_point": staged.entry_point,
    });
    let rendered = self.renderer.render(DOCKERFILE_TEMPLATE, &bindings)?;
    let descriptor = input.dir.join(DESCRIPTOR_FILENAME);
    tokio::fs::write(&descriptor, rendered)
      .await
      .map_err(io_err(&descriptor))?;
    debug!(target = %name, path = %descriptor.display(), "wrote descriptor");

    let tag = input.spec.tag(name);
    let built = if self.options.build_images {
      cancellable(
        cancel,
        self
          .builder
          .build_image(&descriptor, &tag, &input.spec.docker_args, &input.dir),
      )
      .await
      .map_err(|_| BuildAssemblyError::Cancelled)??;
      true
    } else {
      debug!(target = %name, "image build skipped");
      false
    };

    info!(
      target = %name,
      tag = %tag,
      mods = staged.mods.len(),
      built,
      "target assembled"
    );
    Ok(AssembledTarget {
      name: name.to_string(),
      dir: input.dir.clone(),
      descriptor,
      tag,
      mods: staged.mods,
      config_files: staged.config_files,
      entry_point: staged.entry_point,
      built,
    })
  }
}

/// Config sources are copied by file name, so two different sources sharing
/// one would overwrite each other.
fn check_config_names(input: &TargetInput) -> Result<(), BuildAssemblyError> {
  let mut seen: BTreeMap<&OsStr, &Path> = BTreeMap::new();
  for source in input.config_files.iter().filter(|s| s.exists()) {
    let Some(name) = source.file_name() else {
      continue;
    };
    match seen.get(name) {
      Some(first) if *first != source.as_path() => {
        return Err(BuildAssemblyError::ConfigCollision {
          target: input.name.clone(),
          name: name.to_string_lossy().into_owned(),
          first: first.to_path_buf(),
          second: source.clone(),
        });
      }
      Some(_) => {}
      None => {
        seen.insert(name, source);
      }
    }
  }
  Ok(())
}

/// Recreate the target directory and copy mods, config files and the entry
/// point into it. Missing sources are logged and skipped.
fn stage(input: &TargetInput) -> Result<Staged, BuildAssemblyError> {
  check_config_names(input)?;
  let dir = &input.dir;
  if dir.exists() {
    std::fs::remove_dir_all(dir).map_err(io_err(dir))?;
  }
  let mods_dir = dir.join("mods");
  let config_dir = dir.join("config");
  std::fs::create_dir_all(&mods_dir).map_err(io_err(&mods_dir))?;
  std::fs::create_dir_all(&config_dir).map_err(io_err(&config_dir))?;

  let mut staged = Staged::default();

  for artifact in &input.artifacts {
    if !artifact.path.is_file() {
      warn!(target = %input.name, path = %artifact.path.display(), "mod file missing, skipping");
      continue;
    }
    let dest = mods_dir.join(&artifact.file_name);
    std::fs::copy(&artifact.path, &dest).map_err(io_err(&dest))?;
    staged.mods.push(artifact.file_name.clone());
  }

  for source in &input.config_files {
    let Some(file_name) = source.file_name() else {
      warn!(target = %input.name, path = %source.display(), "config entry has no file name, skipping");
      continue;
    };
    if !source.exists() {
      warn!(target = %input.name, path = %source.display(), "config file missing, skipping");
      continue;
    }
    let name = file_name.to_string_lossy().into_owned();
    // Names are unique per source at this point.
    if staged.config_files.contains(&name) {
      continue;
    }
    let dest = config_dir.join(file_name);
    copy_recursively(source, &dest).map_err(io_err(&dest))?;
    staged.config_files.push(name);
  }

  if let Some(entry_point) = &input.entry_point {
    if entry_point.is_file() {
      let dest = dir.join(ENTRY_POINT_FILENAME);
      std::fs::copy(entry_point, &dest).map_err(io_err(&dest))?;
      staged.entry_point = true;
    } else {
      warn!(target = %input.name, path = %entry_point.display(), "entry point missing, skipping");
    }
  }

  Ok(staged)
}
