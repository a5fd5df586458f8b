//! Implementation of the `layerbuild export` command.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::json;

use layerbuild_lib::config::BuildConfig;

use super::{open_store, resolve_layer};
use crate::output::{OutputFormat, print_json, print_success};

pub fn cmd_export(config: &BuildConfig, layer: &str, dest: &Path, format: OutputFormat) -> Result<()> {
  let store = open_store(config)?;
  let id = resolve_layer(&store, layer)?;

  if dest.exists() {
    let mut entries = dest
      .read_dir()
      .with_context(|| format!("Failed to read {}", dest.display()))?;
    if entries.next().is_some() {
      bail!("export destination is not empty: {}", dest.display());
    }
  }

  store
    .materialize(&id, dest)
    .with_context(|| format!("Failed to export layer {}", id.short()))?;

  if format.is_json() {
    print_json(&json!({ "layer": id, "dest": dest }))?;
  } else {
    print_success(&format!("Exported {} to {}", id.short(), dest.display()));
  }
  Ok(())
}
