//! FROM instruction implementation.

use std::path::Path;

use tracing::debug;

use crate::execute::types::ExecuteError;
use crate::layer::LayerStore;
use crate::layer::base::{BaseImage, resolve_base};
use crate::util::fs::copy_tree;

/// Look up a base image, failing with a resolution error if it is unknown.
pub fn require_base(store: &LayerStore, image: &str) -> Result<BaseImage, ExecuteError> {
  resolve_base(store, image)?.ok_or_else(|| ExecuteError::Resolution {
    image: image.to_string(),
  })
}

/// Seed a root layer's delta with the base image's filesystem.
pub fn apply_base(base: &BaseImage, diff_dir: &Path) -> Result<(), ExecuteError> {
  if let Some(rootfs) = &base.rootfs {
    debug!(base = %base.name, "copying base rootfs");
    copy_tree(rootfs, diff_dir)?;
  }
  Ok(())
}
