//! Registry of base images.
//!
//! A base image is a named root filesystem imported from a host directory.
//! `scratch` is built in and always resolves to an empty filesystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::{BASE_DIR_HASH_LEN, BASE_METADATA_FILE, BASE_ROOTFS_DIR, LAYER_FORMAT_VERSION, SCRATCH_BASE};
use crate::layer::store::{LayerStore, StoreError, io_error};
use crate::util::fs::copy_tree;
use crate::util::hash::{hash_bytes, hash_directory};

/// Persisted as `base.json` next to the imported root filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRecord {
  pub version: u32,
  pub name: String,
  pub content_hash: String,
  pub imported_at: u64,
}

/// A resolved base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
  pub name: String,
  pub content_hash: String,
  /// `None` for `scratch`.
  pub rootfs: Option<PathBuf>,
}

impl BaseImage {
  pub fn scratch() -> Self {
    Self {
      name: SCRATCH_BASE.to_string(),
      content_hash: hash_bytes(SCRATCH_BASE.as_bytes()).0,
      rootfs: None,
    }
  }
}

fn base_dir(store: &LayerStore, name: &str) -> PathBuf {
  let hash = hash_bytes(name.as_bytes());
  store.bases_dir().join(&hash.0[..BASE_DIR_HASH_LEN])
}

fn validate_name(name: &str) -> Result<(), StoreError> {
  let valid = !name.is_empty()
    && name != SCRATCH_BASE
    && !name.chars().any(|c| c.is_whitespace() || c.is_control());
  if valid {
    Ok(())
  } else {
    Err(StoreError::InvalidBaseName(name.to_string()))
  }
}

/// Copy `source` into the store as base image `name`, replacing any
/// previous import under that name.
pub fn import_base(store: &LayerStore, name: &str, source: &Path) -> Result<BaseImage, StoreError> {
  validate_name(name)?;
  if !source.is_dir() {
    return Err(StoreError::InvalidBaseSource(source.to_path_buf()));
  }

  let staging = store.scratch()?;
  let rootfs = staging.path().join(BASE_ROOTFS_DIR);
  copy_tree(source, &rootfs).map_err(io_error(source))?;
  let content_hash = hash_directory(&rootfs)?;

  let record = BaseRecord {
    version: LAYER_FORMAT_VERSION,
    name: name.to_string(),
    content_hash: content_hash.0.clone(),
    imported_at: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
  };
  let record_path = staging.path().join(BASE_METADATA_FILE);
  let json = serde_json::to_string_pretty(&record).map_err(|source| StoreError::Metadata {
    path: record_path.clone(),
    source,
  })?;
  fs::write(&record_path, json).map_err(io_error(&record_path))?;

  let target = base_dir(store, name);
  if target.exists() {
    let graveyard = store.scratch()?;
    fs::rename(&target, graveyard.path().join("replaced")).map_err(io_error(&target))?;
    debug!(name = %name, "replacing existing base image");
  }
  fs::rename(staging.path(), &target).map_err(io_error(&target))?;

  info!(name = %name, hash = %content_hash, "imported base image");
  Ok(BaseImage {
    name: name.to_string(),
    content_hash: content_hash.0,
    rootfs: Some(target.join(BASE_ROOTFS_DIR)),
  })
}

fn read_record(dir: &Path) -> Result<Option<BaseRecord>, StoreError> {
  let path = dir.join(BASE_METADATA_FILE);
  let content = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(io_error(&path)(e)),
  };
  serde_json::from_str(&content)
    .map(Some)
    .map_err(|source| StoreError::Metadata { path, source })
}

/// Look up a base image by exact name.
pub fn resolve_base(store: &LayerStore, name: &str) -> Result<Option<BaseImage>, StoreError> {
  if name == SCRATCH_BASE {
    return Ok(Some(BaseImage::scratch()));
  }

  let dir = base_dir(store, name);
  let Some(record) = read_record(&dir)? else {
    return Ok(None);
  };
  if record.name != name {
    return Ok(None);
  }
  Ok(Some(BaseImage {
    name: record.name,
    content_hash: record.content_hash,
    rootfs: Some(dir.join(BASE_ROOTFS_DIR)),
  }))
}

/// All registered bases sorted by name, `scratch` included.
pub fn list_bases(store: &LayerStore) -> Result<Vec<BaseImage>, StoreError> {
  let mut bases = vec![BaseImage::scratch()];
  let dir = store.bases_dir();
  for entry in fs::read_dir(&dir).map_err(io_error(&dir))? {
    let entry = entry.map_err(io_error(&dir))?;
    if let Some(record) = read_record(&entry.path())? {
      bases.push(BaseImage {
        name: record.name,
        content_hash: record.content_hash,
        rootfs: Some(entry.path().join(BASE_ROOTFS_DIR)),
      });
    }
  }
  bases.sort_by(|a, b| a.name.cmp(&b.name));
  Ok(bases)
}
