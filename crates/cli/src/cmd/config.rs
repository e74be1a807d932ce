use std::path::PathBuf;

use anyhow::{Context, Result};

use craft_lib::config::DumpFormat;
use craft_lib::env::CraftEnv;

use super::GlobalArgs;

/// Print the merged configuration as YAML, or JSON with `--format json`.
pub fn cmd_config(env: &CraftEnv, global: &GlobalArgs, configs: Vec<PathBuf>) -> Result<()> {
  let pipeline = global.pipeline(env, configs, global.options());
  let config = pipeline.load_config().context("Failed to load configuration")?;
  let format = if global.format.is_json() {
    DumpFormat::Json
  } else {
    DumpFormat::Yaml
  };
  print!("{}", config.dump(format)?);
  if format == DumpFormat::Json {
    println!();
  }
  Ok(())
}
