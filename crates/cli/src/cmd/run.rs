use std::path::PathBuf;

use anyhow::{Context, Result};

use craft_lib::build::RunSpec;
use craft_lib::env::CraftEnv;
use craft_lib::util::cancel::cancellable;

use super::{GlobalArgs, cancel_token, runtime};
use crate::output::{print_json, print_stat, print_success};

/// Start the container of an already built server image.
pub fn cmd_run(env: &CraftEnv, global: &GlobalArgs, configs: Vec<PathBuf>, server: &str) -> Result<()> {
  let pipeline = global.pipeline(env, configs, global.options());
  let config = pipeline.load_config().context("Failed to load configuration")?;
  let spec = RunSpec::for_server(server, &config, env)?;
  let builder = pipeline.builder();

  let rt = runtime()?;
  let id = rt
    .block_on(async {
      let cancel = cancel_token(global.timeout);
      cancellable(&cancel, builder.run_container(&spec)).await
    })
    .context("Run cancelled")?
    .with_context(|| format!("Failed to start '{}'", server))?;

  if global.format.is_json() {
    return print_json(&serde_json::json!({ "id": id, "spec": spec }));
  }
  print_success(&format!("Started {} ({})", spec.name, spec.image));
  print_stat("Container", &id);
  for port in &spec.ports {
    print_stat("Port", port);
  }
  for volume in &spec.volumes {
    print_stat("Volume", volume);
  }
  Ok(())
}
