//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated test environment.
///
/// Each test gets its own temporary directory with an isolated store and
/// build context.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("context")).unwrap();
    Self { temp }
  }

  /// Store path (isolated per test).
  pub fn store_path(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  /// Build context directory.
  pub fn context_path(&self) -> PathBuf {
    self.temp.path().join("context")
  }

  /// Path of the recipe written by [`write_recipe`](Self::write_recipe).
  pub fn recipe_path(&self) -> PathBuf {
    self.temp.path().join("Recipe")
  }

  pub fn write_recipe(&self, content: &str) {
    std::fs::write(self.recipe_path(), content).unwrap();
  }

  /// Write a file relative to the build context.
  pub fn write_context_file(&self, relative_path: &str, content: &str) {
    write_file(&self.context_path(), relative_path, content);
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    write_file(self.temp.path(), relative_path, content);
  }

  /// Get a pre-configured Command for the layerbuild binary.
  ///
  /// Sets `LAYERBUILD_STORE` to the isolated store and clears the other
  /// configuration variables.
  pub fn layerbuild_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("layerbuild");
    cmd.env("LAYERBUILD_STORE", self.store_path());
    cmd.env_remove("LAYERBUILD_TIMEOUT");
    cmd.env_remove("LAYERBUILD_SHELL");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// `layerbuild build` of the written recipe against the context.
  pub fn build_cmd(&self) -> Command {
    let mut cmd = self.layerbuild_cmd();
    cmd.arg("build").arg(self.recipe_path()).arg("--context").arg(self.context_path());
    cmd
  }

  /// Build with JSON output and return the parsed report.
  pub fn build_json(&self) -> serde_json::Value {
    let output = self.build_cmd().args(["--output", "json"]).output().unwrap();
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
      panic!(
        "invalid JSON ({}): {}\nstderr: {}",
        e,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
      )
    })
  }

  /// Build and return the artifact id, failing the test if the build fails.
  pub fn build_artifact(&self) -> String {
    let report = self.build_json();
    assert_eq!(report["status"], "succeeded", "{}", report);
    report["artifact"].as_str().unwrap().to_string()
  }
}

fn write_file(root: &Path, relative_path: &str, content: &str) {
  let path = root.join(relative_path);
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).unwrap();
  }
  std::fs::write(&path, content).unwrap();
}
