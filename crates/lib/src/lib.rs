//! craft-lib: configuration-driven container builds for game server fleets
//!
//! A run moves through four stages:
//! - [`config`]: load, merge and validate the YAML documents into a `MergedConfig`
//! - [`layers`]: clone or update the git repositories the fleet is composed from
//! - [`mods`]: resolve declared mods against remote providers and download them
//! - [`build`]: write one build directory per server and hand it to the image builder
//!
//! [`pipeline::Pipeline`] wires the stages together; each is usable on its own.

pub mod build;
pub mod cache;
pub mod config;
pub mod consts;
pub mod env;
pub mod layers;
pub mod mods;
pub mod pipeline;
pub mod util;

pub use env::CraftEnv;
pub use pipeline::{Pipeline, PipelineError, PipelineOptions, RunReport};
