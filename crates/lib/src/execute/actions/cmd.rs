//! RUN instruction implementation.
//!
//! The parent layer chain is materialized into a private root, the command
//! runs with its working directory inside that root, and whatever changed
//! is captured as the new layer's delta.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::build::BuildContext;
use crate::consts::{DEFAULT_PATH, STDERR_TAIL_LINES};
use crate::execute::types::{ExecuteEnv, ExecuteError};
use crate::layer::diff::{capture_delta, snapshot_tree};
use crate::util::fs::image_relative;

/// Execute a `RUN` instruction on top of the context's current layer.
///
/// Writes the delta into `diff_dir` and returns the whiteouts.
pub async fn run_in_layer(
  env: &ExecuteEnv<'_>,
  command: &str,
  ctx: &BuildContext,
  diff_dir: &Path,
) -> Result<Vec<String>, ExecuteError> {
  let scratch = env.store.scratch()?;
  let rootfs = scratch.path().join("rootfs");
  let tmp_dir = scratch.path().join("tmp");
  tokio::fs::create_dir_all(&rootfs).await?;
  tokio::fs::create_dir_all(&tmp_dir).await?;

  if let Some(parent) = &ctx.current_layer {
    env.store.materialize(parent, &rootfs)?;
  }
  let before = snapshot_tree(&rootfs)?;

  let cwd = rootfs.join(image_relative(&ctx.workdir));
  tokio::fs::create_dir_all(&cwd).await?;

  let code = execute_cmd(
    command,
    &ctx.env,
    &cwd,
    &rootfs,
    &tmp_dir,
    env.shell,
    env.timeout,
    env.cancel,
  )
  .await?;
  debug!(code, "command finished");

  let after = snapshot_tree(&rootfs)?;
  let whiteouts = capture_delta(&rootfs, &before, &after, diff_dir)?;
  Ok(whiteouts)
}

/// Run a shell command with a cleared environment.
///
/// The environment contains only:
/// - `PATH` (from `user_env`, else a standard system path)
/// - `HOME` and `LAYERBUILD_ROOT`, both the image root
/// - `TMPDIR`/`TMP`/`TEMP`/`TEMPDIR` pointing outside the image root
/// - `LANG`/`LC_ALL` = `C` and a fixed `SOURCE_DATE_EPOCH`
/// - everything in `user_env`
///
/// Returns the exit code. The child is killed when the timeout expires or
/// `cancel` fires.
#[allow(clippy::too_many_arguments)]
pub async fn execute_cmd(
  cmd: &str,
  user_env: &BTreeMap<String, String>,
  cwd: &Path,
  root: &Path,
  tmp_dir: &Path,
  shell: Option<&str>,
  timeout: Option<Duration>,
  cancel: &CancellationToken,
) -> Result<i32, ExecuteError> {
  info!(cmd = %cmd, "executing command");

  let (shell_cmd, shell_args) = get_shell(shell);
  let path = user_env.get("PATH").map(String::as_str).unwrap_or(DEFAULT_PATH);

  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .current_dir(cwd)
    .env_clear()
    .env("PATH", path)
    .env("HOME", root)
    .env("LAYERBUILD_ROOT", root)
    .env("TMPDIR", tmp_dir)
    .env("TMP", tmp_dir)
    .env("TEMP", tmp_dir)
    .env("TEMPDIR", tmp_dir)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    // 1980-01-01T00:00:00Z, the ZIP epoch
    .env("SOURCE_DATE_EPOCH", "315532800")
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  for (key, value) in user_env {
    command.env(key, value);
  }

  debug!(shell = %shell_cmd, working_dir = ?cwd, "spawning process");
  let child = command.spawn()?;
  let wait = child.wait_with_output();

  let output = tokio::select! {
    _ = cancel.cancelled() => {
      info!(cmd = %cmd, "command cancelled");
      return Err(ExecuteError::Cancelled);
    }
    result = async {
      match timeout {
        Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| ExecuteError::Timeout {
          command: cmd.to_string(),
          timeout: limit,
        }),
        None => Ok(wait.await),
      }
    } => result??,
  };

  let stdout = String::from_utf8_lossy(&output.stdout);
  let stderr = String::from_utf8_lossy(&output.stderr);
  if !stdout.trim().is_empty() {
    debug!(stdout = %stdout.trim_end(), "command stdout");
  }
  if !stderr.trim().is_empty() {
    debug!(stderr = %stderr.trim_end(), "command stderr");
  }

  if !output.status.success() {
    return Err(ExecuteError::Command {
      command: cmd.to_string(),
      exit_code: output.status.code(),
      stderr_tail: tail_lines(&stderr, STDERR_TAIL_LINES),
    });
  }

  Ok(output.status.code().unwrap_or(0))
}

/// The last `n` lines of `text`.
fn tail_lines(text: &str, n: usize) -> String {
  let lines: Vec<&str> = text.lines().collect();
  let start = lines.len().saturating_sub(n);
  lines[start..].join("\n")
}

/// The argv prefix a RUN command is appended to, e.g. `["/bin/sh", "-c"]`.
pub fn shell_command(override_shell: Option<&str>) -> Vec<String> {
  let (shell, args) = get_shell(override_shell);
  std::iter::once(shell).chain(args).collect()
}

/// Get the shell command and arguments for the current platform.
///
/// Without an override this is always `/bin/sh` (Unix) or `powershell.exe`
/// (Windows), never `$SHELL`, which may source user profiles.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
