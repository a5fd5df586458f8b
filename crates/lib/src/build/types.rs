use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::execute::ExecuteError;
use crate::layer::LayerId;
use crate::recipe::{InstructionKind, RecipeError, SyntaxError};

/// Lifecycle of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
}

impl fmt::Display for BuildStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      BuildStatus::Pending => "pending",
      BuildStatus::Running => "running",
      BuildStatus::Succeeded => "succeeded",
      BuildStatus::Failed => "failed",
    };
    f.write_str(s)
  }
}

/// How a step's layer was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
  /// Found in the cache without executing.
  Cached,
  /// Executed by this build.
  Executed,
  /// Another build committed the same layer first.
  Reused,
}

/// One completed step of a build.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
  /// 0-based position in the recipe.
  pub index: usize,
  /// 1-based source line.
  pub line: usize,
  pub kind: InstructionKind,
  pub layer: LayerId,
  pub outcome: StepOutcome,
  pub duration: Duration,
}

/// Classification of a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Syntax,
  Resolution,
  Path,
  Command,
  Timeout,
  Cancelled,
  Store,
  Io,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ErrorKind::Syntax => "SyntaxError",
      ErrorKind::Resolution => "ResolutionError",
      ErrorKind::Path => "PathError",
      ErrorKind::Command => "CommandError",
      ErrorKind::Timeout => "TimeoutError",
      ErrorKind::Cancelled => "Cancelled",
      ErrorKind::Store => "StoreError",
      ErrorKind::Io => "IoError",
    };
    f.write_str(s)
  }
}

/// Why a build failed.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("failed to read recipe {path}: {source}")]
  ReadRecipe {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("syntax error: {0}")]
  Syntax(#[from] SyntaxError),

  /// An instruction failed; `source` is the originating error.
  #[error("step {index} ({kind}, line {line}) failed: {source}")]
  Step {
    index: usize,
    kind: InstructionKind,
    line: usize,
    #[source]
    source: ExecuteError,
  },
}

impl From<RecipeError> for BuildError {
  fn from(err: RecipeError) -> Self {
    match err {
      RecipeError::Read { path, source } => BuildError::ReadRecipe { path, source },
      RecipeError::Syntax(err) => BuildError::Syntax(err),
    }
  }
}

impl BuildError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      BuildError::ReadRecipe { .. } => ErrorKind::Io,
      BuildError::Syntax(_) => ErrorKind::Syntax,
      BuildError::Step { source, .. } => match source {
        ExecuteError::Resolution { .. } => ErrorKind::Resolution,
        ExecuteError::Path { .. } => ErrorKind::Path,
        ExecuteError::Command { .. } => ErrorKind::Command,
        ExecuteError::Timeout { .. } => ErrorKind::Timeout,
        ExecuteError::Cancelled => ErrorKind::Cancelled,
        ExecuteError::Io(_) => ErrorKind::Io,
        ExecuteError::Store(_) | ExecuteError::Diff(_) | ExecuteError::Hash(_) | ExecuteError::Key(_) => {
          ErrorKind::Store
        }
      },
    }
  }

  /// Index of the failed instruction, if the failure happened in one.
  pub fn step_index(&self) -> Option<usize> {
    match self {
      BuildError::Step { index, .. } => Some(*index),
      _ => None,
    }
  }
}

/// Result of a build run.
#[derive(Debug)]
pub struct BuildOutcome {
  pub status: BuildStatus,
  /// Final layer id; set only on success.
  pub artifact: Option<LayerId>,
  /// Completed steps in order.
  pub steps: Vec<StepReport>,
  pub error: Option<BuildError>,
}

impl BuildOutcome {
  pub(crate) fn failed(error: BuildError) -> Self {
    Self {
      status: BuildStatus::Failed,
      artifact: None,
      steps: Vec::new(),
      error: Some(error),
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == BuildStatus::Succeeded
  }

  /// Number of steps this build executed itself.
  pub fn executed(&self) -> usize {
    self
      .steps
      .iter()
      .filter(|s| s.outcome == StepOutcome::Executed)
      .count()
  }

  pub fn cached(&self) -> usize {
    self.steps.iter().filter(|s| s.outcome == StepOutcome::Cached).count()
  }
}
