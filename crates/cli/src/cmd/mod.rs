mod base;
mod build;
mod export;
mod history;
mod inspect;

pub use base::{cmd_base_import, cmd_base_ls};
pub use build::cmd_build;
pub use export::cmd_export;
pub use history::cmd_history;
pub use inspect::cmd_inspect;

use anyhow::{Context, Result, bail};
use layerbuild_lib::config::BuildConfig;
use layerbuild_lib::layer::{LayerId, LayerStore};

fn open_store(config: &BuildConfig) -> Result<LayerStore> {
  LayerStore::open(&config.store).with_context(|| format!("Failed to open layer store at {}", config.store.display()))
}

/// Resolve a full layer id or a unique prefix of one.
fn resolve_layer(store: &LayerStore, arg: &str) -> Result<LayerId> {
  if arg.is_empty() {
    bail!("layer id must not be empty");
  }
  match store.find(arg)? {
    Some(id) => Ok(id),
    None => bail!("no layer matches {}", arg),
  }
}
