//! Build configuration.
//!
//! Values resolve in order: explicit setters (CLI flags), then environment
//! variables, then defaults.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::platform::paths::store_dir;

/// Per-`RUN` timeout in whole seconds.
pub const TIMEOUT_ENV: &str = "LAYERBUILD_TIMEOUT";

/// Shell override for `RUN` instructions.
pub const SHELL_ENV: &str = "LAYERBUILD_SHELL";

/// Configuration for a build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  /// Root of the layer store.
  pub store: PathBuf,

  /// Upper bound on a single `RUN` instruction. `None` waits forever.
  pub timeout: Option<Duration>,

  /// Skip cache lookups; every instruction executes.
  pub no_cache: bool,

  /// Shell used for `RUN`. If None, uses /bin/sh (Unix) or powershell.exe (Windows).
  pub shell: Option<String>,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      store: store_dir(),
      timeout: timeout_from_env(),
      no_cache: false,
      shell: std::env::var(SHELL_ENV).ok().filter(|s| !s.is_empty()),
    }
  }
}

impl BuildConfig {
  pub fn with_store(mut self, store: impl Into<PathBuf>) -> Self {
    self.store = store.into();
    self
  }

  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_no_cache(mut self, no_cache: bool) -> Self {
    self.no_cache = no_cache;
    self
  }

  pub fn with_shell(mut self, shell: Option<String>) -> Self {
    self.shell = shell;
    self
  }
}

fn timeout_from_env() -> Option<Duration> {
  let raw = std::env::var(TIMEOUT_ENV).ok()?;
  match raw.trim().parse::<u64>() {
    Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
    Ok(_) => None,
    Err(e) => {
      warn!(value = %raw, error = %e, "ignoring invalid {}", TIMEOUT_ENV);
      None
    }
  }
}
