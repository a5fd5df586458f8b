//! Filesystem deltas between two states of an image root.
//!
//! A delta is a `diff/` tree holding every added or changed entry, plus a
//! list of whiteouts naming the top-most paths that were removed. Applying
//! a delta removes the whiteouts first, then overlays the diff tree.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use tracing::trace;
use walkdir::WalkDir;

use crate::util::fs::{DirModes, copy_entry, copy_tree, file_mode, image_relative, rel_string, remove_path};
use crate::util::hash::{DirHashError, hash_file};

/// What a single tree entry looks like, compared across snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySig {
  File { hash: String, mode: u32 },
  Dir { mode: u32 },
  Symlink { target: String },
}

/// Relative path (forward slashes) to entry signature.
pub type TreeSnapshot = BTreeMap<String, EntrySig>;

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
  #[error("failed to walk {path}: {message}")]
  Walk { path: String, message: String },

  #[error(transparent)]
  Hash(#[from] DirHashError),

  #[error("failed to copy {path}: {source}")]
  Copy {
    path: String,
    #[source]
    source: io::Error,
  },
}

/// Record the signature of every entry below `root`.
///
/// Special files (sockets, devices) are ignored.
pub fn snapshot_tree(root: &Path) -> Result<TreeSnapshot, DiffError> {
  let mut snapshot = TreeSnapshot::new();
  if !root.exists() {
    return Ok(snapshot);
  }

  for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| DiffError::Walk {
      path: root.display().to_string(),
      message: e.to_string(),
    })?;
    let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
    let file_type = entry.file_type();

    let sig = if file_type.is_symlink() {
      let target = std::fs::read_link(entry.path()).map_err(|e| DiffError::Walk {
        path: entry.path().display().to_string(),
        message: e.to_string(),
      })?;
      EntrySig::Symlink {
        target: target.to_string_lossy().into_owned(),
      }
    } else if file_type.is_dir() {
      EntrySig::Dir {
        mode: entry_mode(&entry)?,
      }
    } else if file_type.is_file() {
      EntrySig::File {
        hash: hash_file(entry.path())?.0,
        mode: entry_mode(&entry)?,
      }
    } else {
      continue;
    };

    snapshot.insert(rel_string(rel), sig);
  }

  Ok(snapshot)
}

fn entry_mode(entry: &walkdir::DirEntry) -> Result<u32, DiffError> {
  let meta = entry.metadata().map_err(|e| DiffError::Walk {
    path: entry.path().display().to_string(),
    message: e.to_string(),
  })?;
  Ok(file_mode(&meta))
}

/// Copy everything that differs between `before` and `after` from `root`
/// into `diff_dir`, and return the whiteouts for removed paths.
///
/// Only the top-most removed path is whited out: when a whole directory
/// disappears, its children are implied. A path whose parent turned into a
/// non-directory is covered by the parent's replacement.
pub fn capture_delta(
  root: &Path,
  before: &TreeSnapshot,
  after: &TreeSnapshot,
  diff_dir: &Path,
) -> Result<Vec<String>, DiffError> {
  std::fs::create_dir_all(diff_dir).map_err(|source| DiffError::Copy {
    path: diff_dir.display().to_string(),
    source,
  })?;

  let mut modes = DirModes::new();
  for (path, sig) in after {
    if before.get(path) == Some(sig) {
      continue;
    }
    trace!(path = %path, "changed");
    copy_with_parents(root, diff_dir, path, &mut modes).map_err(|source| DiffError::Copy {
      path: path.clone(),
      source,
    })?;
  }
  modes.apply().map_err(|source| DiffError::Copy {
    path: diff_dir.display().to_string(),
    source,
  })?;

  let mut whiteouts = Vec::new();
  for path in before.keys() {
    if after.contains_key(path) {
      continue;
    }
    let parent_is_dir = match path.rsplit_once('/') {
      None => true,
      Some((parent, _)) => matches!(after.get(parent), Some(EntrySig::Dir { .. })),
    };
    if parent_is_dir {
      trace!(path = %path, "removed");
      whiteouts.push(path.clone());
    }
  }

  Ok(whiteouts)
}

/// Copy one entry into the diff, carrying unchanged parent directories along
/// with their original permissions.
fn copy_with_parents(root: &Path, diff_dir: &Path, path: &str, modes: &mut DirModes) -> io::Result<()> {
  let mut prefix = String::new();
  let mut parts = path.split('/').peekable();
  while let Some(part) = parts.next() {
    if parts.peek().is_none() {
      break;
    }
    if !prefix.is_empty() {
      prefix.push('/');
    }
    prefix.push_str(part);
    if std::fs::symlink_metadata(diff_dir.join(&prefix)).is_err() {
      copy_entry(&root.join(&prefix), &diff_dir.join(&prefix), modes)?;
    }
  }
  copy_entry(&root.join(path), &diff_dir.join(path), modes)
}

/// Apply a layer delta on top of `dest`.
pub fn apply_delta(diff_dir: &Path, whiteouts: &[String], dest: &Path) -> io::Result<()> {
  let mut modes = DirModes::new();
  for whiteout in whiteouts {
    let rel = image_relative(whiteout);
    if rel.as_os_str().is_empty() {
      continue;
    }
    let target = dest.join(rel);
    if let Some(parent) = target.parent()
      && parent.is_dir()
    {
      modes.hold(parent)?;
    }
    remove_path(&target)?;
  }
  modes.apply()?;

  if diff_dir.exists() {
    copy_tree(diff_dir, dest)?;
  } else {
    std::fs::create_dir_all(dest)?;
  }
  Ok(())
}
