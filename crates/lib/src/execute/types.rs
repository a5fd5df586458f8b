//! Types for instruction execution.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::layer::LayerStore;
use crate::layer::diff::DiffError;
use crate::layer::store::StoreError;
use crate::util::hash::{DirHashError, HashError};

/// Errors that can occur while applying a single instruction.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// `FROM` named a base image that is not registered.
  #[error("base image not found: {image}")]
  Resolution { image: String },

  /// A `COPY` source is missing or escapes the build context.
  #[error("{path}: {reason}")]
  Path { path: String, reason: String },

  /// A `RUN` command exited unsuccessfully.
  #[error("command failed with exit code {}: {command}", exit_code.map_or("none (killed by signal)".to_string(), |c| c.to_string()))]
  Command {
    command: String,
    exit_code: Option<i32>,
    stderr_tail: String,
  },

  /// A `RUN` command exceeded the configured timeout and was killed.
  #[error("command timed out after {}s: {command}", timeout.as_secs_f64())]
  Timeout { command: String, timeout: Duration },

  /// The build was cancelled before or during this instruction.
  #[error("build cancelled")]
  Cancelled,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("failed to capture filesystem changes: {0}")]
  Diff(#[from] DiffError),

  #[error("failed to hash input: {0}")]
  Hash(#[from] DirHashError),

  #[error("failed to compute cache key: {0}")]
  Key(#[from] HashError),
}

/// Everything an instruction handler needs besides the instruction and
/// the build context.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteEnv<'a> {
  pub store: &'a LayerStore,

  /// Directory `COPY` sources are resolved against. Never written.
  pub context_root: &'a Path,

  /// Upper bound on a single `RUN`.
  pub timeout: Option<Duration>,

  /// Shell override for `RUN`.
  pub shell: Option<&'a str>,

  pub cancel: &'a CancellationToken,
}
