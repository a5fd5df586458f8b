//! Implementation of the `layerbuild inspect` command.

use anyhow::Result;

use layerbuild_lib::config::BuildConfig;

use super::{open_store, resolve_layer};
use crate::output::{OutputFormat, format_timestamp, print_json, print_stat, print_success};

pub fn cmd_inspect(config: &BuildConfig, layer: &str, format: OutputFormat) -> Result<()> {
  let store = open_store(config)?;
  let id = resolve_layer(&store, layer)?;
  let layer = store.load(&id)?;

  if format.is_json() {
    return print_json(&layer);
  }

  print_success(&format!("Layer {}", layer.id));
  print_stat(
    "Parent",
    layer.parent.as_ref().map(|p| p.0.as_str()).unwrap_or("(none)"),
  );
  print_stat("Instruction", &layer.instruction.to_string());
  print_stat("Created", &format_timestamp(layer.created_at));
  print_stat("Workdir", &layer.config.workdir);
  if !layer.config.env.is_empty() {
    let env: Vec<_> = layer.config.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    print_stat("Env", &env.join(" "));
  }
  print_stat("Removed", &layer.whiteouts.len().to_string());
  print_stat("Diff hash", &layer.diff_hash);
  Ok(())
}
