use std::collections::BTreeMap;

use crate::layer::{ImageConfig, Layer, LayerId};
use crate::recipe::Instruction;
use crate::util::fs::{image_relative, rel_string};

/// Mutable state threaded through one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
  /// Layer the next instruction builds on. `None` before `FROM`.
  pub current_layer: Option<LayerId>,
  pub env: BTreeMap<String, String>,
  /// Absolute in-image working directory.
  pub workdir: String,
  /// Exit status of the most recent `RUN`.
  pub exit_status: Option<i32>,
}

impl Default for BuildContext {
  fn default() -> Self {
    Self::new()
  }
}

impl BuildContext {
  pub fn new() -> Self {
    Self {
      current_layer: None,
      env: BTreeMap::new(),
      workdir: "/".to_string(),
      exit_status: None,
    }
  }

  /// Image configuration to record on a layer built from this context.
  pub fn config(&self) -> ImageConfig {
    ImageConfig {
      env: self.env.clone(),
      workdir: self.workdir.clone(),
    }
  }

  /// Move onto `layer`, taking its recorded configuration.
  pub fn adopt(&mut self, layer: &Layer) {
    self.current_layer = Some(layer.id.clone());
    self.env = layer.config.env.clone();
    self.workdir = layer.config.workdir.clone();
    if matches!(layer.instruction, Instruction::RunCommand { .. }) {
      self.exit_status = Some(0);
    }
  }

  /// A copy of this context advanced onto `layer`.
  pub fn advanced(&self, layer: &Layer) -> Self {
    let mut next = self.clone();
    next.adopt(layer);
    next
  }

  /// Resolve `path` against the current workdir and make it current.
  pub fn set_workdir(&mut self, path: &str) {
    let joined = if path.starts_with('/') {
      path.to_string()
    } else {
      format!("{}/{}", self.workdir, path)
    };
    self.workdir = format!("/{}", rel_string(&image_relative(&joined)));
  }

  /// Set variables in declaration order. `$NAME` and `${NAME}` in values
  /// expand against the environment as it was before this call.
  pub fn set_env(&mut self, vars: &[(String, String)]) {
    let previous = self.env.clone();
    for (key, value) in vars {
      self.env.insert(key.clone(), expand(value, &previous));
    }
  }
}

/// Expand `$NAME` and `${NAME}` references. Unknown names expand to the
/// empty string; `\$` is a literal dollar sign.
pub fn expand(value: &str, env: &BTreeMap<String, String>) -> String {
  let mut out = String::with_capacity(value.len());
  let mut chars = value.chars().peekable();

  while let Some(c) = chars.next() {
    match c {
      '\\' if chars.peek() == Some(&'$') => {
        out.push('$');
        chars.next();
      }
      '$' => match chars.peek() {
        Some('{') => {
          chars.next();
          let mut name = String::new();
          let mut closed = false;
          for c in chars.by_ref() {
            if c == '}' {
              closed = true;
              break;
            }
            name.push(c);
          }
          if closed {
            out.push_str(env.get(&name).map(String::as_str).unwrap_or(""));
          } else {
            out.push_str("${");
            out.push_str(&name);
          }
        }
        Some(&next) if next == '_' || next.is_ascii_alphabetic() => {
          let mut name = String::new();
          while let Some(&c) = chars.peek() {
            if c == '_' || c.is_ascii_alphanumeric() {
              name.push(c);
              chars.next();
            } else {
              break;
            }
          }
          out.push_str(env.get(&name).map(String::as_str).unwrap_or(""));
        }
        _ => out.push('$'),
      },
      _ => out.push(c),
    }
  }

  out
}
