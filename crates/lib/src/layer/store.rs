//! Content-addressed layer storage.
//!
//! Layers are staged in a temporary directory under the store, their
//! metadata is written, and the whole directory is renamed into
//! `layers/<id>/`. The rename is the commit point: a layer directory is
//! either absent or complete, and when two writers race on the same id the
//! first rename wins.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::consts::{LAYER_DIFF_DIR, LAYER_FORMAT_VERSION, LAYER_METADATA_FILE};
use crate::layer::diff::apply_delta;
use crate::layer::types::{Layer, LayerDraft, LayerId};
use crate::store_lock::StoreLockError;
use crate::util::fs::make_tree_writable;
use crate::util::hash::{DirHashError, hash_directory};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("invalid metadata at {path}: {source}")]
  Metadata {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("layer not found: {0}")]
  NotFound(LayerId),

  #[error("layer id prefix {prefix} is ambiguous ({count} matches)")]
  AmbiguousId { prefix: String, count: usize },

  #[error(transparent)]
  Lock(#[from] StoreLockError),

  #[error("invalid base image name: {0:?}")]
  InvalidBaseName(String),

  #[error("base image source is not a directory: {0}")]
  InvalidBaseSource(PathBuf),
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
  move |source| StoreError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Whether a layer was written by this call or found already present.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
  Committed(Layer),
  Existing(Layer),
}

impl CommitOutcome {
  pub fn layer(&self) -> &Layer {
    match self {
      CommitOutcome::Committed(layer) | CommitOutcome::Existing(layer) => layer,
    }
  }
}

/// A private temporary directory under the store's `tmp/`, deleted on drop
/// even when it holds read-only directories.
#[derive(Debug)]
pub struct ScratchDir {
  dir: TempDir,
}

impl ScratchDir {
  pub fn path(&self) -> &Path {
    self.dir.path()
  }
}

impl Drop for ScratchDir {
  fn drop(&mut self) {
    if let Err(e) = make_tree_writable(self.dir.path()) {
      debug!(path = %self.dir.path().display(), error = %e, "failed to unlock scratch directory");
    }
  }
}

/// A layer being assembled. Dropped without commit, it is deleted.
#[derive(Debug)]
pub struct StagedLayer {
  dir: ScratchDir,
}

impl StagedLayer {
  /// Directory to write the layer's added and changed entries into.
  pub fn diff_dir(&self) -> PathBuf {
    self.dir.path().join(LAYER_DIFF_DIR)
  }
}

/// Handle to a layer store on disk. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LayerStore {
  root: PathBuf,
}

impl LayerStore {
  /// Open the store at `root`, creating its directories if needed.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let store = Self { root: root.into() };
    for dir in [store.layers_dir(), store.bases_dir(), store.locks_dir(), store.tmp_dir()] {
      fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    }
    debug!(root = %store.root.display(), "opened layer store");
    Ok(store)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn layers_dir(&self) -> PathBuf {
    self.root.join("layers")
  }

  pub fn bases_dir(&self) -> PathBuf {
    self.root.join("bases")
  }

  pub fn locks_dir(&self) -> PathBuf {
    self.root.join("locks")
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self.root.join("tmp")
  }

  pub fn layer_dir(&self, id: &LayerId) -> PathBuf {
    self.layers_dir().join(&id.0)
  }

  pub fn diff_dir(&self, id: &LayerId) -> PathBuf {
    self.layer_dir(id).join(LAYER_DIFF_DIR)
  }

  pub fn contains(&self, id: &LayerId) -> bool {
    self.layer_dir(id).join(LAYER_METADATA_FILE).is_file()
  }

  /// Load a layer's metadata, or `None` if it is not in the store.
  pub fn get(&self, id: &LayerId) -> Result<Option<Layer>, StoreError> {
    let path = self.layer_dir(id).join(LAYER_METADATA_FILE);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(io_error(&path)(e)),
    };
    let layer = serde_json::from_str(&content).map_err(|source| StoreError::Metadata { path, source })?;
    Ok(Some(layer))
  }

  /// Like [`get`](Self::get), but a missing layer is an error.
  pub fn load(&self, id: &LayerId) -> Result<Layer, StoreError> {
    self.get(id)?.ok_or_else(|| StoreError::NotFound(id.clone()))
  }

  /// Find the layer whose id is `prefix` or starts with it.
  ///
  /// Returns `None` when nothing matches and an error when more than one
  /// layer does.
  pub fn find(&self, prefix: &str) -> Result<Option<LayerId>, StoreError> {
    let exact = LayerId(prefix.to_string());
    if self.contains(&exact) {
      return Ok(Some(exact));
    }

    let dir = self.layers_dir();
    let mut matches = Vec::new();
    for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
      let entry = entry.map_err(io_error(&dir))?;
      let name = entry.file_name().to_string_lossy().into_owned();
      if name.starts_with(prefix) && entry.path().join(LAYER_METADATA_FILE).is_file() {
        matches.push(LayerId(name));
      }
    }

    match matches.len() {
      0 => Ok(None),
      1 => Ok(matches.pop()),
      count => Err(StoreError::AmbiguousId {
        prefix: prefix.to_string(),
        count,
      }),
    }
  }

  /// Check that a layer's diff still hashes to what was recorded at commit.
  pub fn verify(&self, layer: &Layer) -> Result<bool, StoreError> {
    let diff_dir = self.diff_dir(&layer.id);
    if !diff_dir.is_dir() {
      return Ok(false);
    }
    let actual = hash_directory(&diff_dir)?;
    if actual.0 != layer.diff_hash {
      warn!(
        layer = %layer.id.short(),
        expected = %layer.diff_hash,
        actual = %actual.0,
        "layer content does not match recorded hash"
      );
      return Ok(false);
    }
    Ok(true)
  }

  /// Remove a layer. The directory is first moved aside so readers never
  /// see a half-deleted layer.
  pub fn remove(&self, id: &LayerId) -> Result<(), StoreError> {
    let dir = self.layer_dir(id);
    if !dir.exists() {
      return Ok(());
    }
    let graveyard = self.scratch()?;
    let moved = graveyard.path().join("removed");
    match fs::rename(&dir, &moved) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(io_error(&dir)(e)),
    }
    info!(layer = %id.short(), "removed layer");
    Ok(())
  }

  /// Start a new layer.
  pub fn stage(&self) -> Result<StagedLayer, StoreError> {
    let dir = self.scratch()?;
    let diff = dir.path().join(LAYER_DIFF_DIR);
    fs::create_dir(&diff).map_err(io_error(&diff))?;
    Ok(StagedLayer { dir })
  }

  /// A private temporary directory on the store's filesystem.
  pub fn scratch(&self) -> Result<ScratchDir, StoreError> {
    let tmp = self.tmp_dir();
    let dir = tempfile::Builder::new()
      .prefix("stage-")
      .tempdir_in(&tmp)
      .map_err(io_error(&tmp))?;
    Ok(ScratchDir { dir })
  }

  /// Write metadata for a staged layer and move it into place.
  ///
  /// If a layer with the same id is already present, the staged copy is
  /// discarded and the existing layer returned.
  pub fn commit(&self, staged: StagedLayer, draft: LayerDraft) -> Result<CommitOutcome, StoreError> {
    if let Some(existing) = self.get(&draft.id)? {
      debug!(layer = %draft.id.short(), "layer already committed");
      return Ok(CommitOutcome::Existing(existing));
    }

    let diff_hash = hash_directory(&staged.diff_dir())?;
    let layer = Layer {
      version: LAYER_FORMAT_VERSION,
      id: draft.id,
      parent: draft.parent,
      instruction: draft.instruction,
      created_at: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      config: draft.config,
      whiteouts: draft.whiteouts,
      diff_hash: diff_hash.0,
    };

    let metadata_path = staged.dir.path().join(LAYER_METADATA_FILE);
    let json = serde_json::to_string_pretty(&layer).map_err(|source| StoreError::Metadata {
      path: metadata_path.clone(),
      source,
    })?;
    fs::write(&metadata_path, json).map_err(io_error(&metadata_path))?;

    let target = self.layer_dir(&layer.id);
    match fs::rename(staged.dir.path(), &target) {
      Ok(()) => {
        info!(layer = %layer.id.short(), parent = ?layer.parent.as_ref().map(|p| p.short()), "committed layer");
        Ok(CommitOutcome::Committed(layer))
      }
      Err(e) => match self.get(&layer.id)? {
        Some(existing) => {
          debug!(layer = %layer.id.short(), "lost commit race, reusing existing layer");
          Ok(CommitOutcome::Existing(existing))
        }
        None => Err(io_error(&target)(e)),
      },
    }
  }

  /// The chain from `id` back to its root, newest first.
  pub fn history(&self, id: &LayerId) -> Result<Vec<Layer>, StoreError> {
    let mut chain = Vec::new();
    let mut next = Some(id.clone());
    while let Some(current) = next {
      let layer = self.load(&current)?;
      next = layer.parent.clone();
      chain.push(layer);
    }
    Ok(chain)
  }

  /// Reconstruct the full filesystem of `id` into `dest`.
  pub fn materialize(&self, id: &LayerId, dest: &Path) -> Result<(), StoreError> {
    let chain = self.history(id)?;
    fs::create_dir_all(dest).map_err(io_error(dest))?;
    for layer in chain.iter().rev() {
      let diff = self.diff_dir(&layer.id);
      apply_delta(&diff, &layer.whiteouts, dest).map_err(io_error(&diff))?;
    }
    debug!(layer = %id.short(), layers = chain.len(), dest = %dest.display(), "materialized layer chain");
    Ok(())
  }
}
