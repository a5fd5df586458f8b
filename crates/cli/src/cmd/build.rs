//! Implementation of the `layerbuild build` command.
//!
//! Runs a recipe against the store, printing one line per step and the
//! resulting artifact. Ctrl-C cancels the build between or during steps.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use layerbuild_lib::build::{BuildError, BuildOutcome, BuildStatus, Builder, ErrorKind, StepOutcome, StepReport};
use layerbuild_lib::config::BuildConfig;
use layerbuild_lib::execute::ExecuteError;
use layerbuild_lib::layer::LayerId;

use crate::output::{OutputFormat, format_duration, print_detail, print_error, print_json, print_success, print_warning, symbols};

pub fn cmd_build(config: BuildConfig, recipe: &Path, context: &Path, format: OutputFormat) -> Result<ExitCode> {
  if !context.is_dir() {
    bail!("build context is not a directory: {}", context.display());
  }

  let builder = Builder::from_config(config).context("Failed to open layer store")?;
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;

  let cancel = CancellationToken::new();
  let outcome = rt.block_on(async {
    let trigger = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling build");
        trigger.cancel();
      }
    });
    builder.build_file(recipe, context, &cancel).await
  });

  if format.is_json() {
    print_json(&BuildReport::from(&outcome))?;
  } else {
    print_outcome(&outcome);
  }

  Ok(if outcome.is_success() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}

fn print_outcome(outcome: &BuildOutcome) {
  for step in &outcome.steps {
    print_step(step);
  }

  if let Some(artifact) = &outcome.artifact {
    println!();
    print_success(&format!(
      "Built {} ({} executed, {} cached)",
      artifact,
      outcome.executed(),
      outcome.cached()
    ));
  }

  if let Some(err) = &outcome.error {
    println!();
    if err.kind() == ErrorKind::Cancelled {
      print_warning(&format!("Build cancelled at step {}", err.step_index().unwrap_or(0)));
      return;
    }
    print_error(&format!("{}: {}", err.kind(), err));
    if let BuildError::Step {
      source: ExecuteError::Command { stderr_tail, .. },
      ..
    } = err
      && !stderr_tail.is_empty()
    {
      print_detail(stderr_tail);
    }
  }
}

fn print_step(step: &StepReport) {
  let label = match step.outcome {
    StepOutcome::Executed => "executed",
    StepOutcome::Cached => "cached",
    StepOutcome::Reused => "reused",
  };
  println!(
    "{} [{}] {:<7} {}  {} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    step.index,
    step.kind.keyword(),
    step.layer.short(),
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    format_duration(step.duration).if_supports_color(Stream::Stdout, |s| s.dimmed()),
  );
}

#[derive(Serialize)]
struct BuildReport<'a> {
  status: BuildStatus,
  artifact: Option<&'a LayerId>,
  steps: Vec<StepView<'a>>,
  error: Option<ErrorView>,
}

#[derive(Serialize)]
struct StepView<'a> {
  index: usize,
  line: usize,
  kind: &'static str,
  layer: &'a LayerId,
  outcome: StepOutcome,
  duration_ms: u128,
}

#[derive(Serialize)]
struct ErrorView {
  kind: ErrorKind,
  step: Option<usize>,
  message: String,
}

impl<'a> From<&'a BuildOutcome> for BuildReport<'a> {
  fn from(outcome: &'a BuildOutcome) -> Self {
    Self {
      status: outcome.status,
      artifact: outcome.artifact.as_ref(),
      steps: outcome
        .steps
        .iter()
        .map(|step| StepView {
          index: step.index,
          line: step.line,
          kind: step.kind.keyword(),
          layer: &step.layer,
          outcome: step.outcome,
          duration_ms: step.duration.as_millis(),
        })
        .collect(),
      error: outcome.error.as_ref().map(|err| ErrorView {
        kind: err.kind(),
        step: err.step_index(),
        message: err.to_string(),
      }),
    }
  }
}
