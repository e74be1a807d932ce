mod build;
mod checkout;
mod config;
mod package;
mod resolve;
mod run;
mod search;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use craft_lib::env::CraftEnv;
use craft_lib::pipeline::{Pipeline, PipelineOptions, ScopedFailure};
use craft_lib::util::cancel::CancellationToken;

use crate::output::{OutputFormat, failure_line, print_error};

pub use build::{BuildFlags, cmd_build};
pub use checkout::cmd_checkout;
pub use config::cmd_config;
pub use package::cmd_package;
pub use resolve::cmd_resolve;
pub use run::cmd_run;
pub use search::cmd_search;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct GlobalArgs {
  pub format: OutputFormat,
  pub parallelism: Option<usize>,
  pub timeout: Option<Duration>,
}

impl GlobalArgs {
  fn options(&self) -> PipelineOptions {
    match self.parallelism {
      Some(n) => PipelineOptions::default().with_parallelism(n.max(1)),
      None => PipelineOptions::default(),
    }
  }

  fn pipeline<'a>(&self, env: &'a CraftEnv, configs: Vec<PathBuf>, options: PipelineOptions) -> Pipeline<'a> {
    Pipeline::new(env, options).with_roots(configs)
  }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

/// A token cancelled on Ctrl-C or once `timeout` elapses.
///
/// Must be called from inside the runtime.
fn cancel_token(timeout: Option<Duration>) -> CancellationToken {
  let token = CancellationToken::new();
  let trigger = token.clone();
  tokio::spawn(async move {
    let deadline = async {
      match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
      }
    };
    tokio::select! {
      _ = trigger.cancelled() => return,
      _ = tokio::signal::ctrl_c() => warn!("interrupted, cancelling"),
      _ = deadline => warn!("timeout reached, cancelling"),
    }
    trigger.cancel();
  });
  token
}

/// Print every failure and turn a non-empty list into an error.
fn finish(failures: &[ScopedFailure], cancelled: bool) -> Result<()> {
  for failure in failures {
    print_error(&failure_line(failure));
  }
  if cancelled {
    anyhow::bail!("run cancelled");
  }
  if !failures.is_empty() {
    anyhow::bail!("{} failure(s)", failures.len());
  }
  Ok(())
}
