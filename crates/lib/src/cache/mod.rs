//! Cache key computation and lookup.
//!
//! A cache key is the SHA-256 of a canonical JSON document naming the
//! parent layer, the instruction kind and arguments, and the content
//! hashes of any external inputs. The key doubles as the id of the layer
//! the instruction produces, so identical inputs converge on identical
//! layers in any store.
//!
//! `RUN` keys also cover the shell argv the command runs under, so switching
//! shells never reuses a layer another shell produced.
//!
//! Lookups follow the cache cliff: once this build has executed an
//! instruction, every later instruction is built on a fresh layer no other
//! build can have produced, so lookups stop.

use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::consts::CACHE_KEY_VERSION;
use crate::execute::ExecuteError;
use crate::execute::actions::{require_base, resolve_context_path, shell_command};
use crate::layer::{Layer, LayerId, LayerStore, StoreError};
use crate::recipe::{Instruction, InstructionKind};
use crate::util::hash::{HashError, Hashable, hash_path};

/// Deterministic identity of an instruction applied to a parent layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(pub String);

impl CacheKey {
  pub fn layer_id(&self) -> LayerId {
    LayerId(self.0.clone())
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Content hash of one external input to an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputDigest {
  /// The input as written in the recipe.
  pub path: String,
  pub hash: String,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
  version: u32,
  parent: Option<&'a str>,
  kind: InstructionKind,
  args: Vec<String>,
  inputs: &'a [InputDigest],
  #[serde(skip_serializing_if = "Option::is_none")]
  shell: Option<&'a [String]>,
}

impl Hashable for KeyMaterial<'_> {}

/// Hash the key material for an instruction. Pure.
///
/// `shell` is the argv prefix `RUN` commands execute under; other
/// instructions ignore it.
pub fn compute_key(
  parent: Option<&LayerId>,
  instruction: &Instruction,
  inputs: &[InputDigest],
  shell: &[String],
) -> Result<CacheKey, HashError> {
  let material = KeyMaterial {
    version: CACHE_KEY_VERSION,
    parent: parent.map(|p| p.0.as_str()),
    kind: instruction.kind(),
    args: instruction.args(),
    inputs,
    shell: matches!(instruction, Instruction::RunCommand { .. }).then_some(shell),
  };
  Ok(CacheKey(material.compute_hash()?.0))
}

/// Result of consulting the cache for one instruction.
#[derive(Debug)]
pub enum Lookup {
  Hit(Layer),
  Miss,
  /// Past the cache cliff, or caching disabled.
  Skipped,
}

/// Per-build cache state.
#[derive(Debug)]
pub struct CacheResolver<'a> {
  store: &'a LayerStore,
  context_root: &'a Path,
  disabled: bool,
  shell: Vec<String>,
  cliff: bool,
}

impl<'a> CacheResolver<'a> {
  pub fn new(store: &'a LayerStore, context_root: &'a Path, disabled: bool, shell: Option<&str>) -> Self {
    Self {
      store,
      context_root,
      disabled,
      shell: shell_command(shell),
      cliff: false,
    }
  }

  /// Compute the cache key for `instruction` on top of `parent`.
  ///
  /// Fails with a resolution error for an unknown base and a path error for
  /// an unusable `COPY` source, before anything executes.
  pub fn resolve(&self, parent: Option<&LayerId>, instruction: &Instruction) -> Result<CacheKey, ExecuteError> {
    let inputs = self.inputs(instruction)?;
    let parent = match instruction {
      Instruction::SetBase { .. } => None,
      _ => parent,
    };
    let key = compute_key(parent, instruction, &inputs, &self.shell)?;
    debug!(key = %key, kind = %instruction.kind(), inputs = inputs.len(), "computed cache key");
    Ok(key)
  }

  fn inputs(&self, instruction: &Instruction) -> Result<Vec<InputDigest>, ExecuteError> {
    match instruction {
      Instruction::SetBase { image } => {
        let base = require_base(self.store, image)?;
        Ok(vec![InputDigest {
          path: image.clone(),
          hash: base.content_hash,
        }])
      }
      Instruction::CopyFiles { sources, .. } => sources
        .iter()
        .map(|source| -> Result<InputDigest, ExecuteError> {
          let resolved = resolve_context_path(self.context_root, source)?;
          Ok(InputDigest {
            path: source.clone(),
            hash: hash_path(&resolved)?.0,
          })
        })
        .collect(),
      Instruction::RunCommand { .. } | Instruction::SetWorkdir { .. } | Instruction::SetEnv { .. } => Ok(Vec::new()),
    }
  }

  /// Look up the layer for `key`.
  ///
  /// A stored layer whose content no longer matches its recorded hash is
  /// removed and reported as a miss.
  pub fn lookup(&self, key: &CacheKey) -> Result<Lookup, StoreError> {
    if self.disabled || self.cliff {
      debug!(key = %key, disabled = self.disabled, "cache lookup skipped");
      return Ok(Lookup::Skipped);
    }

    let id = key.layer_id();
    let Some(layer) = self.store.get(&id)? else {
      debug!(key = %key, "cache miss");
      return Ok(Lookup::Miss);
    };

    if !self.store.verify(&layer)? {
      warn!(layer = %id.short(), "discarding corrupted cached layer");
      self.store.remove(&id)?;
      return Ok(Lookup::Miss);
    }

    debug!(key = %key, "cache hit");
    Ok(Lookup::Hit(layer))
  }

  /// Record that this build executed an instruction itself.
  pub fn note_executed(&mut self) {
    self.cliff = true;
  }
}
