//! The build loop.

use std::path::Path;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::build::context::BuildContext;
use crate::build::types::{BuildError, BuildOutcome, BuildStatus, StepOutcome, StepReport};
use crate::cache::{CacheKey, CacheResolver, Lookup};
use crate::config::BuildConfig;
use crate::execute::{self, ExecuteEnv, ExecuteError};
use crate::layer::{CommitOutcome, Layer, LayerStore, StoreError};
use crate::recipe::{self, Recipe, Step};
use crate::store_lock::KeyLock;

/// Runs recipes against a layer store.
#[derive(Debug, Clone)]
pub struct Builder {
  store: LayerStore,
  config: BuildConfig,
}

impl Builder {
  pub fn new(store: LayerStore, config: BuildConfig) -> Self {
    Self { store, config }
  }

  /// Open the store named by `config` and build against it.
  pub fn from_config(config: BuildConfig) -> Result<Self, StoreError> {
    let store = LayerStore::open(&config.store)?;
    Ok(Self::new(store, config))
  }

  pub fn store(&self) -> &LayerStore {
    &self.store
  }

  pub fn config(&self) -> &BuildConfig {
    &self.config
  }

  /// Parse `text` and build it. A syntax error fails the build before any
  /// instruction runs.
  pub async fn build_text(&self, text: &str, context_root: &Path, cancel: &CancellationToken) -> BuildOutcome {
    match recipe::parse(text) {
      Ok(recipe) => self.build(&recipe, context_root, cancel).await,
      Err(err) => BuildOutcome::failed(err.into()),
    }
  }

  /// Read, parse and build the recipe at `path`.
  pub async fn build_file(&self, path: &Path, context_root: &Path, cancel: &CancellationToken) -> BuildOutcome {
    match recipe::parse_file(path) {
      Ok(recipe) => self.build(&recipe, context_root, cancel).await,
      Err(err) => BuildOutcome::failed(err.into()),
    }
  }

  /// Run every instruction of `recipe` in order, stopping at the first
  /// failure.
  ///
  /// Cancellation is checked before each instruction and interrupts a
  /// running command or a wait on another build's lock.
  pub async fn build(&self, recipe: &Recipe, context_root: &Path, cancel: &CancellationToken) -> BuildOutcome {
    let mut status = BuildStatus::Pending;
    let mut ctx = BuildContext::new();
    let mut steps = Vec::with_capacity(recipe.len());
    let mut resolver = CacheResolver::new(&self.store, context_root, self.config.no_cache, self.config.shell.as_deref());
    let env = ExecuteEnv {
      store: &self.store,
      context_root,
      timeout: self.config.timeout,
      shell: self.config.shell.as_deref(),
      cancel,
    };

    debug!(from = %status, to = %BuildStatus::Running, "build status");
    status = BuildStatus::Running;
    info!(base = %recipe.base, steps = recipe.len(), context = %context_root.display(), "build started");

    for (index, step) in recipe.steps.iter().enumerate() {
      let started = Instant::now();
      info!(step = index, line = step.line, "{}", step.instruction);

      let result = if cancel.is_cancelled() {
        Err(ExecuteError::Cancelled)
      } else {
        self.run_step(&env, &mut resolver, step, &ctx).await
      };

      match result {
        Ok((layer, next, outcome)) => {
          debug!(step = index, layer = %layer.id.short(), outcome = ?outcome, "step complete");
          steps.push(StepReport {
            index,
            line: step.line,
            kind: step.instruction.kind(),
            layer: layer.id,
            outcome,
            duration: started.elapsed(),
          });
          ctx = next;
        }
        Err(source) => {
          error!(step = index, line = step.line, error = %source, "step failed");
          debug!(from = %status, to = %BuildStatus::Failed, "build status");
          return BuildOutcome {
            status: BuildStatus::Failed,
            artifact: None,
            steps,
            error: Some(BuildError::Step {
              index,
              kind: step.instruction.kind(),
              line: step.line,
              source,
            }),
          };
        }
      }
    }

    debug!(from = %status, to = %BuildStatus::Succeeded, "build status");
    let artifact = ctx.current_layer;
    info!(
      artifact = ?artifact.as_ref().map(|id| id.short()),
      executed = steps.iter().filter(|s| s.outcome == StepOutcome::Executed).count(),
      "build succeeded"
    );
    BuildOutcome {
      status: BuildStatus::Succeeded,
      artifact,
      steps,
      error: None,
    }
  }

  async fn run_step(
    &self,
    env: &ExecuteEnv<'_>,
    resolver: &mut CacheResolver<'_>,
    step: &Step,
    ctx: &BuildContext,
  ) -> Result<(Layer, BuildContext, StepOutcome), ExecuteError> {
    let key = resolver.resolve(ctx.current_layer.as_ref(), &step.instruction)?;

    let recheck = match resolver.lookup(&key)? {
      Lookup::Hit(layer) => {
        let next = ctx.advanced(&layer);
        return Ok((layer, next, StepOutcome::Cached));
      }
      Lookup::Miss => true,
      Lookup::Skipped => false,
    };

    // Writers of the same key serialize on its lock. Past the cache cliff
    // the store is only consulted again if another build held the lock.
    let (_lock, contended) = self.lock_key(&key, env.cancel).await?;
    if (recheck || (contended && !self.config.no_cache))
      && let Some(layer) = self.store.get(&key.layer_id())?
    {
      info!(layer = %layer.id.short(), "layer committed by another build");
      let next = ctx.advanced(&layer);
      return Ok((layer, next, StepOutcome::Reused));
    }

    resolver.note_executed();
    let (committed, next) = execute::apply(env, &key, &step.instruction, ctx).await?;
    Ok(match committed {
      CommitOutcome::Committed(layer) => (layer, next, StepOutcome::Executed),
      CommitOutcome::Existing(layer) => (layer, next, StepOutcome::Reused),
    })
  }

  /// Take the write lock for `key`, waiting for another build that holds
  /// it. The flag reports whether the lock was contended.
  async fn lock_key(&self, key: &CacheKey, cancel: &CancellationToken) -> Result<(KeyLock, bool), ExecuteError> {
    let locks_dir = self.store.locks_dir();
    match KeyLock::try_acquire(&locks_dir, &key.0) {
      Ok(lock) => return Ok((lock, false)),
      Err(e) if e.is_contention() => {
        info!(layer = %key.layer_id().short(), reason = %e, "waiting for another build");
      }
      Err(e) => return Err(StoreError::from(e).into()),
    }

    let owned_key = key.0.clone();
    let wait = tokio::task::spawn_blocking(move || KeyLock::acquire_blocking(&locks_dir, &owned_key));
    tokio::select! {
      _ = cancel.cancelled() => Err(ExecuteError::Cancelled),
      joined = wait => {
        let lock = joined
          .map_err(|e| ExecuteError::Io(std::io::Error::other(e)))?
          .map_err(StoreError::from)?;
        Ok((lock, true))
      }
    }
  }
}
