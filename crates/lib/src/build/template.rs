//! Descriptor rendering.

use std::collections::BTreeMap;
use std::path::Path;

use minijinja::Environment;
use serde_json::Value;
use tracing::{debug, info};

use super::BuildAssemblyError;

/// Name of the descriptor template.
pub const DOCKERFILE_TEMPLATE: &str = "Dockerfile.j2";

const BUILTIN_DOCKERFILE: &str = include_str!("../../templates/Dockerfile.j2");

pub trait TemplateRenderer: Send + Sync {
  fn render(&self, name: &str, bindings: &Value) -> Result<String, BuildAssemblyError>;
}

/// Renders templates with minijinja.
///
/// Starts from the built-in templates; a file with the same name in the
/// override directory replaces the built-in one.
#[derive(Debug, Clone)]
pub struct MiniJinjaRenderer {
  sources: BTreeMap<String, String>,
}

impl Default for MiniJinjaRenderer {
  fn default() -> Self {
    let mut sources = BTreeMap::new();
    sources.insert(DOCKERFILE_TEMPLATE.to_string(), BUILTIN_DOCKERFILE.to_string());
    Self { sources }
  }
}

impl MiniJinjaRenderer {
  pub fn new(templates_dir: Option<&Path>) -> Result<Self, BuildAssemblyError> {
    let mut renderer = Self::default();
    let Some(dir) = templates_dir else {
      return Ok(renderer);
    };

    for name in [DOCKERFILE_TEMPLATE] {
      let path = dir.join(name);
      if !path.is_file() {
        debug!(path = %path.display(), "no template override");
        continue;
      }
      let source = std::fs::read_to_string(&path).map_err(|source| BuildAssemblyError::Io {
        path: path.clone(),
        source,
      })?;
      info!(template = name, path = %path.display(), "using template override");
      renderer.sources.insert(name.to_string(), source);
    }
    Ok(renderer)
  }

  /// Add or replace a template from source text.
  pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
    self.sources.insert(name.into(), source.into());
    self
  }
}

impl TemplateRenderer for MiniJinjaRenderer {
  fn render(&self, name: &str, bindings: &Value) -> Result<String, BuildAssemblyError> {
    let render_err = |e: minijinja::Error| BuildAssemblyError::Render {
      template: name.to_string(),
      message: e.to_string(),
    };
    let source = self.sources.get(name).ok_or_else(|| BuildAssemblyError::Render {
      template: name.to_string(),
      message: "no such template".to_string(),
    })?;

    let mut env = Environment::new();
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
    // JSON string literal, which is also a valid double-quoted Dockerfile value.
    env.add_filter("quoted", |s: String| -> Result<String, minijinja::Error> {
      serde_json::to_string(&s).map_err(|e| minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string()))
    });
    env.add_template(name, source).map_err(render_err)?;
    let template = env.get_template(name).map_err(render_err)?;
    template
      .render(minijinja::Value::from_serialize(bindings))
      .map_err(render_err)
  }
}
