//! The end-to-end run: configuration, then layers and mods side by side, then
//! build context assembly.
//!
//! Configuration errors abort the run before anything is touched. Every later
//! failure is scoped to one layer, declaration or target and collected in the
//! [`RunReport`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::build::{
  AssembleOptions, AssemblyReport, BuildAssemblyError, BuildContextAssembler, DockerCli, ImageBuilder,
  MiniJinjaRenderer, ModloaderRegistry, TemplateRenderer,
};
use crate::cache::Cache;
use crate::config::{ConfigError, ConfigResolver, MergedConfig};
use crate::env::CraftEnv;
use crate::layers::{GitCli, LayerReport, LayerSynchronizer, SyncOptions, Vcs};
use crate::mods::download::http_client;
use crate::mods::{Downloader, ModError, ModReport, ModResolver, ProviderContext, ProviderRegistry, ResolveOptions};
use crate::util::cancel::CancellationToken;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Mods(#[from] ModError),

  #[error(transparent)]
  Build(#[from] BuildAssemblyError),
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
  pub sync: SyncOptions,
  pub resolve: ResolveOptions,
  pub assemble: AssembleOptions,
}

impl PipelineOptions {
  /// Use the same pool size for every phase.
  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.sync.parallelism = parallelism;
    self.resolve.parallelism = parallelism;
    self.assemble.parallelism = parallelism;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
  Layers,
  Mods,
  Assembly,
}

impl std::fmt::Display for Phase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Phase::Layers => "layer",
      Phase::Mods => "mod",
      Phase::Assembly => "target",
    })
  }
}

/// One failure with the context it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopedFailure {
  pub phase: Phase,
  /// Layer name, `provider/slug (targets)`, or target name.
  pub scope: String,
  pub message: String,
}

#[derive(Debug)]
pub struct RunReport {
  pub config_sources: Vec<PathBuf>,
  pub layers: LayerReport,
  pub mods: ModReport,
  pub assembly: AssemblyReport,
  /// The run was cancelled before assembly.
  pub cancelled: bool,
}

impl ScopedFailure {
  pub fn from_layers(report: &LayerReport) -> Vec<Self> {
    report
      .failures
      .iter()
      .map(|f| ScopedFailure {
        phase: Phase::Layers,
        scope: f.layer.clone(),
        message: f.error.to_string(),
      })
      .collect()
  }

  pub fn from_mods(report: &ModReport) -> Vec<Self> {
    report
      .failures
      .iter()
      .map(|f| {
        let subject = match (f.provider.is_empty(), f.slug.is_empty()) {
          (true, _) => String::new(),
          (false, true) => f.provider.clone(),
          (false, false) => format!("{}/{}", f.provider, f.slug),
        };
        let scope = match (subject.is_empty(), f.targets.is_empty()) {
          (true, _) => f.targets.join(", "),
          (false, true) => subject,
          (false, false) => format!("{} ({})", subject, f.targets.join(", ")),
        };
        ScopedFailure {
          phase: Phase::Mods,
          scope,
          message: f.error.to_string(),
        }
      })
      .collect()
  }

  pub fn from_assembly(report: &AssemblyReport) -> Vec<Self> {
    report
      .failures
      .iter()
      .map(|f| ScopedFailure {
        phase: Phase::Assembly,
        scope: f.target.clone(),
        message: f.error.to_string(),
      })
      .collect()
  }
}

impl RunReport {
  /// Every failure of the run, layers first.
  pub fn failures(&self) -> Vec<ScopedFailure> {
    let mut failures = ScopedFailure::from_layers(&self.layers);
    failures.extend(ScopedFailure::from_mods(&self.mods));
    failures.extend(ScopedFailure::from_assembly(&self.assembly));
    failures
  }

  pub fn is_success(&self) -> bool {
    !self.cancelled
      && self.layers.failures.is_empty()
      && self.mods.failures.is_empty()
      && self.assembly.failures.is_empty()
  }
}

/// Wires the collaborators of one run together.
pub struct Pipeline<'a> {
  env: &'a CraftEnv,
  roots: Option<Vec<PathBuf>>,
  options: PipelineOptions,
  vcs: Arc<dyn Vcs>,
  builder: Arc<dyn ImageBuilder>,
  registry: Option<Arc<ProviderRegistry>>,
  renderer: Option<Arc<dyn TemplateRenderer>>,
  modloaders: Arc<ModloaderRegistry>,
}

impl std::fmt::Debug for Pipeline<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pipeline")
      .field("roots", &self.roots)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

impl<'a> Pipeline<'a> {
  /// Production collaborators: `git`, `docker` and the built-in providers.
  pub fn new(env: &'a CraftEnv, options: PipelineOptions) -> Self {
    Self {
      env,
      roots: None,
      options,
      vcs: Arc::new(GitCli::from_env(env)),
      builder: Arc::new(DockerCli::from_env(env)),
      registry: None,
      renderer: None,
      modloaders: Arc::new(ModloaderRegistry::with_defaults()),
    }
  }

  /// Root documents; defaults to `MC_CONFIG`.
  pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
    self.roots = (!roots.is_empty()).then_some(roots);
    self
  }

  pub fn with_vcs(mut self, vcs: Arc<dyn Vcs>) -> Self {
    self.vcs = vcs;
    self
  }

  pub fn with_builder(mut self, builder: Arc<dyn ImageBuilder>) -> Self {
    self.builder = builder;
    self
  }

  pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
    self.registry = Some(registry);
    self
  }

  pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
    self.renderer = Some(renderer);
    self
  }

  pub fn env(&self) -> &CraftEnv {
    self.env
  }

  pub fn builder(&self) -> Arc<dyn ImageBuilder> {
    self.builder.clone()
  }

  pub fn load_config(&self) -> Result<MergedConfig, ConfigError> {
    let resolver = match &self.roots {
      Some(roots) => ConfigResolver::new(self.env, roots.iter().cloned()),
      None => ConfigResolver::from_env(self.env),
    };
    resolver.resolve()
  }

  /// The configured provider registry, or the built-in providers.
  pub fn registry(&self) -> Result<Arc<ProviderRegistry>, ModError> {
    if let Some(registry) = &self.registry {
      return Ok(registry.clone());
    }
    let context = ProviderContext {
      downloader: Downloader::new(http_client()?, self.env.downloads_dir()),
      repo_url: self.env.repo_url().to_string(),
    };
    Ok(Arc::new(ProviderRegistry::with_defaults(context, self.env)))
  }

  pub fn synchronizer(&self, config: &MergedConfig) -> LayerSynchronizer {
    LayerSynchronizer::new(self.vcs.clone(), config.layers_dir(self.env), self.options.sync)
  }

  pub fn resolver(&self) -> Result<ModResolver, ModError> {
    Ok(ModResolver::new(
      self.registry()?,
      Cache::new(self.env.cache_dir()),
      self.options.resolve.clone(),
    ))
  }

  pub fn assembler(&self, config: &MergedConfig) -> Result<BuildContextAssembler, BuildAssemblyError> {
    let renderer: Arc<dyn TemplateRenderer> = match &self.renderer {
      Some(renderer) => renderer.clone(),
      None => Arc::new(MiniJinjaRenderer::new(config.templates_dir(self.env).as_deref())?),
    };
    Ok(BuildContextAssembler::new(
      renderer,
      self.builder.clone(),
      self.modloaders.clone(),
      self.options.assemble.clone(),
    ))
  }

  /// Run every phase.
  pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, PipelineError> {
    let config = self.load_config()?;

    let synchronizer = self.synchronizer(&config);
    let resolver = self.resolver()?;
    let assembler = self.assembler(&config)?;

    let (layers, mods) = tokio::join!(
      synchronizer.sync_all(config.layers(), cancel),
      resolver.resolve_all(&config, cancel),
    );
    let layers = layers?;
    debug!(
      layers = layers.outcomes.len(),
      servers = mods.artifacts.len(),
      "layers and mods settled"
    );

    let cancelled = cancel.is_cancelled();
    let assembly = if cancelled {
      warn!("run cancelled, skipping assembly");
      AssemblyReport::default()
    } else {
      assembler.assemble_all(&config, self.env, &mods, cancel).await
    };

    Ok(RunReport {
      config_sources: config.sources().to_vec(),
      layers,
      mods,
      assembly,
      cancelled,
    })
  }
}
