//! COPY instruction implementation.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::execute::types::ExecuteError;
use crate::util::fs::{copy_path, copy_tree, image_relative};

fn path_error(path: &str, reason: &str) -> ExecuteError {
  ExecuteError::Path {
    path: path.to_string(),
    reason: reason.to_string(),
  }
}

/// Resolve a `COPY` source against the build-context root.
///
/// Absolute sources are taken relative to the root. The source must exist
/// and must stay inside the root both lexically and after following
/// symlinks. Returns the canonical path.
pub fn resolve_context_path(context_root: &Path, source: &str) -> Result<PathBuf, ExecuteError> {
  let mut relative = PathBuf::new();
  for component in Path::new(source).components() {
    match component {
      Component::Normal(part) => relative.push(part),
      Component::ParentDir => {
        if !relative.pop() {
          return Err(path_error(source, "escapes the build context"));
        }
      }
      Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
    }
  }

  let candidate = context_root.join(&relative);
  if std::fs::symlink_metadata(&candidate).is_err() {
    return Err(path_error(source, "not found in build context"));
  }

  let root = dunce::canonicalize(context_root)?;
  let resolved = dunce::canonicalize(&candidate).map_err(|_| path_error(source, "not found in build context"))?;
  if !resolved.starts_with(&root) {
    return Err(path_error(source, "escapes the build context"));
  }

  Ok(resolved)
}

/// Image-root-relative destination of a `COPY`, and whether it names a
/// directory to copy into.
fn destination_in_image(destination: &str, workdir: &str, source_count: usize) -> (PathBuf, bool) {
  let absolute = if destination.starts_with('/') {
    destination.to_string()
  } else {
    format!("{}/{}", workdir.trim_end_matches('/'), destination)
  };
  let relative = image_relative(&absolute);
  let into_dir = source_count > 1
    || destination.ends_with('/')
    || destination == "."
    || destination.ends_with("/.")
    || relative.as_os_str().is_empty();
  (relative, into_dir)
}

/// Copy `sources` from the build context into `diff_dir` at `destination`.
///
/// A directory source has its contents copied, not the directory itself.
pub fn apply_copy(
  context_root: &Path,
  sources: &[String],
  destination: &str,
  workdir: &str,
  diff_dir: &Path,
) -> Result<(), ExecuteError> {
  let (dest, into_dir) = destination_in_image(destination, workdir, sources.len());
  let target_base = diff_dir.join(&dest);

  for source in sources {
    let resolved = resolve_context_path(context_root, source)?;

    if resolved.is_dir() {
      debug!(source = %source, dest = %dest.display(), "copying directory contents");
      copy_tree(&resolved, &target_base)?;
      continue;
    }

    let target = if into_dir {
      let name = Path::new(source)
        .file_name()
        .or_else(|| resolved.file_name())
        .ok_or_else(|| path_error(source, "has no file name"))?;
      target_base.join(name)
    } else {
      target_base.clone()
    };
    debug!(source = %source, target = %target.display(), "copying file");
    copy_path(&resolved, &target)?;
  }

  Ok(())
}
