//! Shared helpers for library integration tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use layerbuild_lib::build::{BuildOutcome, Builder};
use layerbuild_lib::config::BuildConfig;
use layerbuild_lib::layer::{LayerStore, base};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A store plus a build context directory, both inside one temp dir.
pub struct Workspace {
  pub temp: TempDir,
  pub store: LayerStore,
  pub context: PathBuf,
}

impl Workspace {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let store = LayerStore::open(temp.path().join("store")).unwrap();
    let context = temp.path().join("context");
    std::fs::create_dir_all(&context).unwrap();
    Self { temp, store, context }
  }

  /// Build configuration that never consults the environment.
  pub fn config(&self) -> BuildConfig {
    BuildConfig {
      store: self.store.root().to_path_buf(),
      timeout: None,
      no_cache: false,
      shell: None,
    }
  }

  pub fn builder(&self) -> Builder {
    Builder::new(self.store.clone(), self.config())
  }

  pub fn builder_with_timeout(&self, timeout: Duration) -> Builder {
    Builder::new(self.store.clone(), self.config().with_timeout(Some(timeout)))
  }

  /// Write a file into the build context.
  pub fn write(&self, relative: &str, content: &str) {
    let path = self.context.join(relative);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
  }

  /// Import a base image made of the given files.
  pub fn import_base(&self, name: &str, files: &[(&str, &str)]) {
    let dir = self.temp.path().join(format!("base-{}", name));
    for (path, content) in files {
      let full = dir.join(path);
      std::fs::create_dir_all(full.parent().unwrap()).unwrap();
      std::fs::write(full, content).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    base::import_base(&self.store, name, &dir).unwrap();
  }

  pub async fn build(&self, recipe: &str) -> BuildOutcome {
    self
      .builder()
      .build_text(recipe, &self.context, &CancellationToken::new())
      .await
  }

  /// Materialize `outcome`'s artifact into a fresh directory.
  pub fn export(&self, outcome: &BuildOutcome) -> PathBuf {
    let artifact = outcome.artifact.as_ref().expect("build has no artifact");
    let dest = self.temp.path().join(format!("export-{}", artifact.short()));
    self.store.materialize(artifact, &dest).unwrap();
    dest
  }

  pub fn layer_count(&self) -> usize {
    std::fs::read_dir(self.store.layers_dir()).unwrap().count()
  }

  pub fn staging_count(&self) -> usize {
    std::fs::read_dir(self.store.tmp_dir()).unwrap().count()
  }
}

pub fn read(path: &Path) -> String {
  std::fs::read_to_string(path).unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}
