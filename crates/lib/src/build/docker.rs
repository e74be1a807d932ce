//! Container engine collaborator.
//!
//! [`DockerCli`] drives the `docker` binary. Child processes are killed when
//! their future is dropped, so a cancelled build does not linger.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::modloader::SERVER_DIR;
use crate::config::{MergedConfig, NetworkSpec};
use crate::env::{CraftEnv, DOCKER_CONFIG};

#[derive(Debug, Error)]
pub enum ExternalToolError {
  #[error("failed to start '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("'{command}' failed ({}): {stderr}", exit_label(.code))]
  Failed {
    command: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("I/O error on '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to extract world archive '{path}': {message}")]
  Archive { path: PathBuf, message: String },

  #[error("server '{0}' is not declared")]
  UnknownServer(String),
}

fn exit_label(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("exit code {}", code),
    None => "killed by signal".to_string(),
  }
}

/// How to start a container for one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSpec {
  pub name: String,
  pub image: String,
  /// `host:container` port mappings.
  pub ports: Vec<String>,
  pub env: BTreeMap<String, String>,
  /// `source:destination` bind mounts.
  pub volumes: Vec<String>,
  pub network: Option<NetworkSpec>,
}

impl RunSpec {
  /// Derive the run spec for `name`.
  ///
  /// A `world.file` archive is extracted to `build_dir/worlds/<name>` first,
  /// replacing any earlier extraction.
  pub fn for_server(name: &str, config: &MergedConfig, env: &CraftEnv) -> Result<Self, ExternalToolError> {
    let server = config
      .server(name)
      .ok_or_else(|| ExternalToolError::UnknownServer(name.to_string()))?;

    let network = server.network.clone();
    let ports = network
      .as_ref()
      .and_then(|n| n.port.as_deref())
      .map(|port| vec![format!("{}:{}", port, port)])
      .unwrap_or_default();

    let mut volumes = Vec::new();
    if let Some(world) = &server.world {
      let world_dir = format!("{}/world", SERVER_DIR);
      if let Some(host) = world.host.as_deref() {
        volumes.push(format!("{}:{}", config.resolve_path(host, env).display(), world_dir));
      } else if let Some(file) = world.file.as_deref() {
        let archive = config.resolve_path(file, env);
        let target = config.build_dir(env).join("worlds").join(name);
        extract_world(&archive, &target)?;
        volumes.push(format!("{}:{}", target.display(), world_dir));
      }
    }

    Ok(Self {
      name: name.to_string(),
      image: server.tag(name),
      ports,
      env: server.merged_env(config.defaults()),
      volumes,
      network,
    })
  }
}

/// Extract a world archive into `target`, removing what was there.
pub fn extract_world(archive: &Path, target: &Path) -> Result<(), ExternalToolError> {
  let io_err = |path: &Path| {
    let path = path.to_path_buf();
    move |source| ExternalToolError::Io { path, source }
  };

  if target.exists() {
    fs::remove_dir_all(target).map_err(io_err(target))?;
  }
  fs::create_dir_all(target).map_err(io_err(target))?;

  let file = File::open(archive).map_err(io_err(archive))?;
  let mut zip = zip::ZipArchive::new(file).map_err(|e| ExternalToolError::Archive {
    path: archive.to_path_buf(),
    message: e.to_string(),
  })?;
  zip.extract(target).map_err(|e| ExternalToolError::Archive {
    path: archive.to_path_buf(),
    message: e.to_string(),
  })?;
  info!(archive = %archive.display(), target = %target.display(), files = zip.len(), "extracted world");
  Ok(())
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
  async fn build_image(
    &self,
    descriptor: &Path,
    tag: &str,
    args: &BTreeMap<String, String>,
    context_dir: &Path,
  ) -> Result<(), ExternalToolError>;

  /// Start a container and return its id.
  async fn run_container(&self, spec: &RunSpec) -> Result<String, ExternalToolError>;
}

/// Uses the `docker` command-line client.
#[derive(Debug, Clone, Default)]
pub struct DockerCli {
  config_dir: Option<PathBuf>,
}

impl DockerCli {
  pub fn new(config_dir: Option<PathBuf>) -> Self {
    Self { config_dir }
  }

  /// Pass `DOCKER_CONFIG` through so private registry credentials apply.
  pub fn from_env(env: &CraftEnv) -> Self {
    Self::new(env.get(DOCKER_CONFIG).map(PathBuf::from))
  }

  fn command(&self, args: &[String]) -> Command {
    let mut command = Command::new("docker");
    command.args(args).kill_on_drop(true);
    if let Some(dir) = &self.config_dir {
      command.env(DOCKER_CONFIG, dir);
    }
    command
  }

  async fn docker(&self, args: &[String]) -> Result<String, ExternalToolError> {
    let rendered = format!("docker {}", args.join(" "));
    debug!(command = %rendered, "running docker");

    let output = self
      .command(args)
      .output()
      .await
      .map_err(|source| ExternalToolError::Spawn {
        program: "docker".to_string(),
        source,
      })?;

    if !output.status.success() {
      return Err(ExternalToolError::Failed {
        command: rendered,
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  /// Whether the command exits successfully; only a spawn failure is an error.
  async fn succeeds(&self, args: &[String]) -> Result<bool, ExternalToolError> {
    let output = self
      .command(args)
      .output()
      .await
      .map_err(|source| ExternalToolError::Spawn {
        program: "docker".to_string(),
        source,
      })?;
    Ok(output.status.success())
  }

  async fn recreate_network(&self, network: &NetworkSpec, name: &str) -> Result<(), ExternalToolError> {
    if self.succeeds(&strings(&["network", "inspect", name])).await? {
      info!(network = %name, "removing existing network");
      self.docker(&strings(&["network", "rm", name])).await?;
    }
    let subnet = network.subnet.as_deref().unwrap_or("172.18.0.0/16");
    let gateway = network.gateway.as_deref().unwrap_or("172.18.0.1");
    self
      .docker(&strings(&["network", "create", "--subnet", subnet, "--gateway", gateway, name]))
      .await?;
    info!(network = %name, subnet, gateway, "created network");
    Ok(())
  }
}

fn strings(args: &[&str]) -> Vec<String> {
  args.iter().map(|s| s.to_string()).collect()
}

/// Arguments for `docker build`.
pub fn build_args(descriptor: &Path, tag: &str, args: &BTreeMap<String, String>, context_dir: &Path) -> Vec<String> {
  let mut out = vec![
    "build".to_string(),
    "--file".to_string(),
    descriptor.display().to_string(),
    "--tag".to_string(),
    tag.to_string(),
  ];
  for (key, value) in args {
    out.push("--build-arg".to_string());
    out.push(format!("{}={}", key, value));
  }
  out.push(context_dir.display().to_string());
  out
}

/// Arguments for `docker run`.
pub fn run_args(spec: &RunSpec) -> Vec<String> {
  let mut out = strings(&["run", "--detach", "--tty", "--name", &spec.name]);
  for port in &spec.ports {
    out.push("--publish".to_string());
    out.push(port.clone());
  }
  for (key, value) in &spec.env {
    out.push("--env".to_string());
    out.push(format!("{}={}", key, value));
  }
  for volume in &spec.volumes {
    out.push("--volume".to_string());
    out.push(volume.clone());
  }
  if let Some(network) = &spec.network
    && let Some(name) = network.name.as_deref()
  {
    out.push("--network".to_string());
    out.push(name.to_string());
    if let Some(ip) = network.ipaddress.as_deref() {
      out.push("--ip".to_string());
      out.push(ip.to_string());
    }
  }
  out.push(spec.image.clone());
  out
}

#[async_trait]
impl ImageBuilder for DockerCli {
  async fn build_image(
    &self,
    descriptor: &Path,
    tag: &str,
    args: &BTreeMap<String, String>,
    context_dir: &Path,
  ) -> Result<(), ExternalToolError> {
    info!(tag, context = %context_dir.display(), "building image");
    self.docker(&build_args(descriptor, tag, args, context_dir)).await?;
    info!(tag, "built image");
    Ok(())
  }

  async fn run_container(&self, spec: &RunSpec) -> Result<String, ExternalToolError> {
    if let Some(network) = &spec.network
      && let Some(name) = network.name.as_deref()
    {
      self.recreate_network(network, name).await?;
    }

    if self.succeeds(&strings(&["container", "inspect", &spec.name])).await? {
      info!(container = %spec.name, "removing existing container");
      self.docker(&strings(&["rm", "--force", &spec.name])).await?;
    }

    let id = self.docker(&run_args(spec)).await?;
    info!(container = %spec.name, id = %id, "started container");
    Ok(id)
  }
}
