//! Implementation of the `craft build` command.
//!
//! Runs the whole pipeline: configuration, layers and mods, then one build
//! directory and image per server.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use craft_lib::env::CraftEnv;
use craft_lib::pipeline::RunReport;

use super::{GlobalArgs, cancel_token, finish, runtime};
use crate::output::{format_duration, print_json, print_stat, print_success, print_warning, symbols, truncate_hash};

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildFlags {
  pub force: bool,
  pub update: bool,
  pub verify: bool,
  pub no_build: bool,
}

pub fn cmd_build(env: &CraftEnv, global: &GlobalArgs, configs: Vec<PathBuf>, flags: BuildFlags) -> Result<()> {
  let start = Instant::now();
  let mut options = global.options();
  options.sync.force = flags.force;
  options.sync.update = flags.update;
  options.resolve.force = flags.force;
  options.resolve.verify_cache_hits = flags.verify;
  options.assemble.build_images = !flags.no_build;

  let pipeline = global.pipeline(env, configs, options);
  let rt = runtime()?;
  let report = rt
    .block_on(async {
      let cancel = cancel_token(global.timeout);
      pipeline.run(&cancel).await
    })
    .context("Build failed")?;

  if global.format.is_json() {
    print_json(&summary(&report))?;
  } else {
    print_report(&report);
    println!(
      "  {} Duration: {}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      format_duration(start.elapsed())
    );
  }

  finish(&report.failures(), report.cancelled)
}

fn summary(report: &RunReport) -> serde_json::Value {
  serde_json::json!({
    "config_sources": report.config_sources,
    "layers": report.layers.outcomes,
    "mods": report.mods.artifacts,
    "targets": report.assembly.targets,
    "failures": report.failures(),
    "cancelled": report.cancelled,
  })
}

fn print_report(report: &RunReport) {
  println!("Layers:");
  for outcome in &report.layers.outcomes {
    let head = outcome.head.as_deref().map(truncate_hash).unwrap_or("-");
    println!("  {} {} {} ({})", symbols::INFO, outcome.name, outcome.action, head);
  }

  for skipped in report.layers.skipped() {
    print_warning(&format!("layer {} {}", skipped.name, skipped.action));
  }

  println!("Mods:");
  for (server, artifacts) in &report.mods.artifacts {
    print_stat(server, &format!("{} artifact(s)", artifacts.len()));
  }

  println!("Targets:");
  for target in &report.assembly.targets {
    let state = if target.built { "built" } else { "assembled" };
    print_success(&format!("{} {} ({})", target.name, target.tag, state));
  }
}
