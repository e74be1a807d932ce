use std::path::PathBuf;

use anyhow::{Context, Result};

use craft_lib::env::CraftEnv;
use craft_lib::pipeline::ScopedFailure;

use super::{GlobalArgs, cancel_token, finish, runtime};
use crate::output::{print_info, print_json, print_success, print_warning, symbols, truncate_hash};

pub fn cmd_checkout(env: &CraftEnv, global: &GlobalArgs, configs: Vec<PathBuf>, force: bool, update: bool) -> Result<()> {
  let mut options = global.options();
  options.sync.force = force;
  options.sync.update = update;

  let pipeline = global.pipeline(env, configs, options);
  let config = pipeline.load_config().context("Failed to load configuration")?;
  if config.layers().is_empty() {
    print_info("No layers declared.");
    return Ok(());
  }

  let rt = runtime()?;
  let (report, cancelled) = rt.block_on(async {
    let cancel = cancel_token(global.timeout);
    let report = pipeline.synchronizer(&config).sync_all(config.layers(), &cancel).await;
    (report, cancel.is_cancelled())
  });
  let report = report.context("Layer synchronization failed")?;

  if global.format.is_json() {
    print_json(&report.outcomes)?;
  } else {
    for outcome in &report.outcomes {
      if report.skipped().any(|s| s.name == outcome.name) {
        print_warning(&format!("{} {}", outcome.name, outcome.action));
        continue;
      }
      let head = outcome.head.as_deref().map(truncate_hash).unwrap_or("-");
      print_success(&format!("{} {} {} {}", outcome.name, outcome.action, symbols::ARROW, head));
    }
  }

  finish(&ScopedFailure::from_layers(&report), cancelled)
}
