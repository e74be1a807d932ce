mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use craft_lib::CraftEnv;

use crate::cmd::GlobalArgs;
use crate::output::OutputFormat;

/// craft - container builds for game server fleets
#[derive(Parser)]
#[command(name = "craft")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Output format
  #[arg(long, global = true, value_enum, default_value_t)]
  format: OutputFormat,

  /// Worker pool size for layers, mods and targets
  #[arg(long, global = true)]
  parallelism: Option<usize>,

  /// Cancel the run after this long (e.g. "10m", "90s")
  #[arg(long, global = true, value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Sync layers, resolve mods, assemble and build every server image
  Build {
    /// Root configuration documents (default: $MC_CONFIG)
    #[arg(short, long = "config")]
    configs: Vec<PathBuf>,

    /// Re-clone layers and re-download mods, ignoring caches
    #[arg(short, long)]
    force: bool,

    /// Check out the configured branch and pull existing layers
    #[arg(short, long)]
    update: bool,

    /// Re-hash cached mod files before trusting them
    #[arg(long)]
    verify: bool,

    /// Assemble build directories without invoking the image builder
    #[arg(long)]
    no_build: bool,
  },

  /// Clone or update the declared layers
  Checkout {
    #[arg(short, long = "config")]
    configs: Vec<PathBuf>,

    #[arg(short, long)]
    force: bool,

    #[arg(short, long)]
    update: bool,
  },

  /// Resolve and download the mods of every server
  Resolve {
    #[arg(short, long = "config")]
    configs: Vec<PathBuf>,

    #[arg(short, long)]
    force: bool,

    #[arg(long)]
    verify: bool,
  },

  /// Search a provider's catalog
  Search {
    /// Provider name (modrinth, curseforge, hangar)
    provider: String,

    query: String,

    /// Only show projects supporting this target version
    #[arg(long)]
    version: Option<String>,
  },

  /// Resolve mods and write a package group
  Package {
    /// Group name used for the archive, manifest and pointer files
    group: String,

    #[arg(short, long = "config")]
    configs: Vec<PathBuf>,

    /// Only package this server's mods
    #[arg(short, long)]
    server: Option<String>,

    /// Provider whose packaging writes the group
    #[arg(short, long, default_value = "modrinth")]
    provider: String,

    /// Output directory (default: $MC_WORK_DIR)
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// Print the merged configuration
  Config {
    #[arg(short, long = "config")]
    configs: Vec<PathBuf>,
  },

  /// Start a container for an assembled server
  Run {
    server: String,

    #[arg(short, long = "config")]
    configs: Vec<PathBuf>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let env = CraftEnv::capture();
  let global = GlobalArgs {
    format: cli.format,
    parallelism: cli.parallelism,
    timeout: cli.timeout,
  };

  match cli.command {
    Commands::Build {
      configs,
      force,
      update,
      verify,
      no_build,
    } => cmd::cmd_build(
      &env,
      &global,
      configs,
      cmd::BuildFlags {
        force,
        update,
        verify,
        no_build,
      },
    ),
    Commands::Checkout { configs, force, update } => cmd::cmd_checkout(&env, &global, configs, force, update),
    Commands::Resolve { configs, force, verify } => cmd::cmd_resolve(&env, &global, configs, force, verify),
    Commands::Search {
      provider,
      query,
      version,
    } => cmd::cmd_search(&env, &global, &provider, &query, version.as_deref()),
    Commands::Package {
      group,
      configs,
      server,
      provider,
      output,
    } => cmd::cmd_package(
      &env,
      &global,
      configs,
      &group,
      server.as_deref(),
      &provider,
      output,
    ),
    Commands::Config { configs } => cmd::cmd_config(&env, &global, configs),
    Commands::Run { server, configs } => cmd::cmd_run(&env, &global, configs, &server),
  }
}
