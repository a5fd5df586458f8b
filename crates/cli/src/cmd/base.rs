//! Implementation of the `layerbuild base` commands.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use layerbuild_lib::config::BuildConfig;
use layerbuild_lib::layer::BaseImage;
use layerbuild_lib::layer::base::{import_base, list_bases};

use super::open_store;
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, truncate_hash};

#[derive(Serialize)]
struct BaseView<'a> {
  name: &'a str,
  content_hash: &'a str,
}

impl<'a> From<&'a BaseImage> for BaseView<'a> {
  fn from(base: &'a BaseImage) -> Self {
    Self {
      name: &base.name,
      content_hash: &base.content_hash,
    }
  }
}

pub fn cmd_base_import(config: &BuildConfig, name: &str, source: &Path, format: OutputFormat) -> Result<()> {
  let store = open_store(config)?;
  let base = import_base(&store, name, source).with_context(|| format!("Failed to import base image '{}'", name))?;

  if format.is_json() {
    print_json(&BaseView::from(&base))?;
  } else {
    print_success(&format!("Imported base image '{}'", base.name));
    print_stat("Content", truncate_hash(&base.content_hash));
  }
  Ok(())
}

pub fn cmd_base_ls(config: &BuildConfig, format: OutputFormat) -> Result<()> {
  let store = open_store(config)?;
  let bases = list_bases(&store).context("Failed to list base images")?;

  if format.is_json() {
    let views: Vec<_> = bases.iter().map(BaseView::from).collect();
    print_json(&views)?;
  } else {
    for base in &bases {
      print_info(&format!("{:<24} {}", base.name, truncate_hash(&base.content_hash)));
    }
  }
  Ok(())
}
