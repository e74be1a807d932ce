//! Implementation of the `craft search` command.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use craft_lib::env::CraftEnv;
use craft_lib::util::cancel::cancellable;

use super::{GlobalArgs, cancel_token, runtime};
use crate::output::{print_info, print_json, symbols};

pub fn cmd_search(env: &CraftEnv, global: &GlobalArgs, provider: &str, query: &str, version: Option<&str>) -> Result<()> {
  let pipeline = craft_lib::Pipeline::new(env, global.options());
  let registry = pipeline.registry().context("Failed to set up providers")?;
  let provider = registry.get(provider)?;

  let rt = runtime()?;
  let hits = rt
    .block_on(async {
      let cancel = cancel_token(global.timeout);
      cancellable(&cancel, provider.search(query, version)).await
    })
    .context("Search cancelled")?
    .with_context(|| format!("Search on {} failed", provider.identify()))?;

  if global.format.is_json() {
    return print_json(&hits);
  }
  if hits.is_empty() {
    print_info(&format!("No results for '{}'.", query));
    return Ok(());
  }

  for hit in &hits {
    let downloads = hit.downloads.map(|d| format!(" [{} downloads]", d)).unwrap_or_default();
    println!(
      "{} {} {}{}",
      symbols::INFO,
      hit.slug.if_supports_color(Stream::Stdout, |s| s.cyan()),
      hit.title,
      downloads.if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
    if !hit.summary.is_empty() {
      println!("    {}", hit.summary);
    }
  }
  Ok(())
}
