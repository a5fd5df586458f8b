//! Instruction execution.
//!
//! [`apply`] turns one instruction plus the current build context into a
//! committed layer and the context for the next instruction. All work
//! happens in a staging directory inside the store; an instruction that
//! fails, times out or is cancelled drops its staging directory and leaves
//! the store untouched.

pub mod actions;
mod types;

use tracing::info;

use crate::build::BuildContext;
use crate::cache::CacheKey;
use crate::layer::{CommitOutcome, LayerDraft};
use crate::recipe::Instruction;

pub use types::{ExecuteEnv, ExecuteError};

/// Apply `instruction` on top of `ctx.current_layer` and commit the result
/// under `key`.
///
/// Returns the commit outcome (a layer committed concurrently under the
/// same key by another build is reused) and the advanced context.
pub async fn apply(
  env: &ExecuteEnv<'_>,
  key: &CacheKey,
  instruction: &Instruction,
  ctx: &BuildContext,
) -> Result<(CommitOutcome, BuildContext), ExecuteError> {
  if env.cancel.is_cancelled() {
    return Err(ExecuteError::Cancelled);
  }

  let staged = env.store.stage()?;
  let mut next = ctx.clone();
  let mut parent = ctx.current_layer.clone();

  let whiteouts = match instruction {
    Instruction::SetBase { image } => {
      let base = actions::require_base(env.store, image)?;
      actions::apply_base(&base, &staged.diff_dir())?;
      next = BuildContext::new();
      parent = None;
      Vec::new()
    }
    Instruction::RunCommand { command } => {
      let whiteouts = actions::run_in_layer(env, command, ctx, &staged.diff_dir()).await?;
      next.exit_status = Some(0);
      whiteouts
    }
    Instruction::CopyFiles { sources, destination } => {
      actions::apply_copy(env.context_root, sources, destination, &ctx.workdir, &staged.diff_dir())?;
      Vec::new()
    }
    Instruction::SetWorkdir { path } => {
      next.set_workdir(path);
      Vec::new()
    }
    Instruction::SetEnv { vars } => {
      next.set_env(vars);
      Vec::new()
    }
  };

  let draft = LayerDraft {
    id: key.layer_id(),
    parent,
    instruction: instruction.clone(),
    config: next.config(),
    whiteouts,
  };
  let outcome = env.store.commit(staged, draft)?;
  next.adopt(outcome.layer());

  info!(layer = %outcome.layer().id.short(), kind = %instruction.kind(), "applied instruction");
  Ok((outcome, next))
}
