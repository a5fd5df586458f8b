use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::recipe::Instruction;

/// Identifier of a layer: the cache key that produced it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub String);

impl LayerId {
  /// First 12 hex characters, for display.
  pub fn short(&self) -> &str {
    let len = self.0.len().min(12);
    &self.0[..len]
  }
}

impl fmt::Display for LayerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Image configuration in effect after a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
  pub env: BTreeMap<String, String>,
  pub workdir: String,
}

impl Default for ImageConfig {
  fn default() -> Self {
    Self {
      env: BTreeMap::new(),
      workdir: "/".to_string(),
    }
  }
}

/// Metadata of a committed layer, stored as `layer.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
  /// Metadata format version.
  pub version: u32,
  pub id: LayerId,
  /// `None` only for layers produced by `FROM`.
  pub parent: Option<LayerId>,
  /// The instruction that produced this layer.
  pub instruction: Instruction,
  /// Creation time (Unix seconds). Not part of the id.
  pub created_at: u64,
  pub config: ImageConfig,
  /// Paths removed relative to the parent, image-root relative.
  #[serde(default)]
  pub whiteouts: Vec<String>,
  /// Full SHA-256 of the `diff/` tree, checked before a cached layer is reused.
  pub diff_hash: String,
}

/// Everything the store needs to commit a layer besides its delta.
#[derive(Debug, Clone)]
pub struct LayerDraft {
  pub id: LayerId,
  pub parent: Option<LayerId>,
  pub instruction: Instruction,
  pub config: ImageConfig,
  pub whiteouts: Vec<String>,
}
