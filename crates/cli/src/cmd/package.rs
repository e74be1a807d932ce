//! Implementation of the `craft package` command.
//!
//! Resolves the declared mods and hands them to a provider, which writes them
//! as one package group: an archive, a manifest and a pointer file.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use craft_lib::env::CraftEnv;
use craft_lib::mods::ResolvedModArtifact;
use craft_lib::pipeline::ScopedFailure;

use super::{GlobalArgs, cancel_token, finish, runtime};
use crate::output::{format_bytes, print_json, print_stat, print_success};

pub fn cmd_package(
  env: &CraftEnv,
  global: &GlobalArgs,
  configs: Vec<PathBuf>,
  group: &str,
  server: Option<&str>,
  provider: &str,
  output: Option<PathBuf>,
) -> Result<()> {
  let pipeline = global.pipeline(env, configs, global.options());
  let config = pipeline.load_config().context("Failed to load configuration")?;
  if let Some(name) = server
    && config.server(name).is_none()
  {
    bail!("server '{}' is not declared", name);
  }
  let packager = pipeline
    .registry()
    .context("Failed to set up providers")?
    .get(provider)?;
  let resolver = pipeline.resolver().context("Failed to set up providers")?;

  let rt = runtime()?;
  let (report, cancelled) = rt.block_on(async {
    let cancel = cancel_token(global.timeout);
    let report = resolver.resolve_all(&config, &cancel).await;
    (report, cancel.is_cancelled())
  });

  let failures = ScopedFailure::from_mods(&report);
  if cancelled || !failures.is_empty() {
    return finish(&failures, cancelled);
  }

  // Servers sharing a mod resolve to the same file; package it once.
  let mut seen = BTreeSet::new();
  let artifacts: Vec<ResolvedModArtifact> = report
    .artifacts
    .iter()
    .filter(|(name, _)| server.is_none_or(|s| s == name.as_str()))
    .flat_map(|(_, artifacts)| artifacts.iter())
    .filter(|a| seen.insert(a.path.clone()))
    .cloned()
    .collect();

  let output_dir = output.unwrap_or_else(|| env.work_dir());
  let packaged = packager
    .package(&artifacts, &output_dir, group)
    .with_context(|| format!("Failed to package group '{}'", group))?;

  if global.format.is_json() {
    return print_json(&serde_json::json!({
      "archive": packaged.archive,
      "manifest": packaged.manifest,
      "pointer": packaged.pointer,
      "artifacts": artifacts.len(),
    }));
  }

  let size = std::fs::metadata(&packaged.archive).map(|m| m.len()).unwrap_or(0);
  print_success(&format!("Packaged {} artifact(s) into '{}'", artifacts.len(), group));
  print_stat("Archive", &format!("{} ({})", packaged.archive.display(), format_bytes(size)));
  print_stat("Manifest", &packaged.manifest.display().to_string());
  print_stat("Pointer", &packaged.pointer.display().to_string());
  Ok(())
}
