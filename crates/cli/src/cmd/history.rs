//! Implementation of the `layerbuild history` command.

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use layerbuild_lib::config::BuildConfig;

use super::{open_store, resolve_layer};
use crate::output::{OutputFormat, print_json};

pub fn cmd_history(config: &BuildConfig, layer: &str, format: OutputFormat) -> Result<()> {
  let store = open_store(config)?;
  let id = resolve_layer(&store, layer)?;
  let chain = store.history(&id)?;

  if format.is_json() {
    return print_json(&chain);
  }

  for layer in &chain {
    println!(
      "{}  {}",
      layer.id.short().if_supports_color(Stream::Stdout, |s| s.yellow()),
      layer.instruction
    );
  }
  Ok(())
}
