use std::path::PathBuf;

use anyhow::{Context, Result};

use craft_lib::env::CraftEnv;
use craft_lib::pipeline::ScopedFailure;

use super::{GlobalArgs, cancel_token, finish, runtime};
use crate::output::{print_info, print_json, print_stat};

pub fn cmd_resolve(env: &CraftEnv, global: &GlobalArgs, configs: Vec<PathBuf>, force: bool, verify: bool) -> Result<()> {
  let mut options = global.options();
  options.resolve.force = force;
  options.resolve.verify_cache_hits = verify;

  let pipeline = global.pipeline(env, configs, options);
  let config = pipeline.load_config().context("Failed to load configuration")?;
  let resolver = pipeline.resolver().context("Failed to set up providers")?;

  let rt = runtime()?;
  let (report, cancelled) = rt.block_on(async {
    let cancel = cancel_token(global.timeout);
    let report = resolver.resolve_all(&config, &cancel).await;
    (report, cancel.is_cancelled())
  });

  if global.format.is_json() {
    print_json(&report.artifacts)?;
  } else if report.artifacts.is_empty() && report.failures.is_empty() {
    print_info("No mods declared.");
  } else {
    for (server, artifacts) in &report.artifacts {
      println!("{}:", server);
      for artifact in artifacts {
        print_stat(&artifact.name, &format!("{} ({})", artifact.version, artifact.file_name));
      }
    }
  }

  finish(&ScopedFailure::from_mods(&report), cancelled)
}
