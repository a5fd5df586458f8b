//! SHA-256 digests for cache keys, layer contents and copy sources.
//!
//! - `ContentHash`: full 64-character lowercase hex digest
//! - `Hashable`: canonical JSON hashing for key structs
//! - `hash_directory()`, `hash_file()`, `hash_path()`, `hash_bytes()`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

pub type HashError = serde_json::Error;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Hash of the JSON serialization of a value.
///
/// Struct fields serialize in declaration order and every map used in a
/// hashed value is a `BTreeMap`, so the result is stable across processes
/// and machines.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ContentHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(hash_bytes(serialized.as_bytes()))
  }
}

#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  Walk { message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn read_error(path: &Path) -> impl FnOnce(io::Error) -> DirHashError + '_ {
  move |source| DirHashError::Read {
    path: path.to_path_buf(),
    source,
  }
}

/// Deterministic digest of everything below `root`.
///
/// Every entry contributes one record made of its relative path, its type and
/// its content. For files that is the byte digest plus the executable bit. For
/// symlinks it is the link target. Timestamps and ownership are ignored and
/// special files are skipped. Siblings are visited in name order.
pub fn hash_directory(root: &Path) -> Result<ContentHash, DirHashError> {
  let mut hasher = Sha256::new();

  for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| DirHashError::Walk { message: e.to_string() })?;
    let path = entry.path();
    let rel = path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/");

    let file_type = entry.file_type();
    let record = if file_type.is_file() {
      let exec = if is_executable(path) { 'x' } else { '-' };
      format!("F:{}:{}:{}", rel, exec, hash_file(path)?)
    } else if file_type.is_dir() {
      format!("D:{}", rel)
    } else if file_type.is_symlink() {
      let target = fs::read_link(path).map_err(read_error(path))?;
      format!("L:{}:{}", rel, target.to_string_lossy())
    } else {
      continue;
    };

    hasher.update(record.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;
  fs::metadata(path).map(|m| m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
  false
}

/// Digest of a file's bytes.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(read_error(path))?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(read_error(path))?;
  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash whatever lives at `path`, following symlinks.
///
/// Directories hash through [`hash_directory`] and are tagged so that a file
/// and a directory with coincidentally equal digests never collide. A file's
/// digest covers its executable bit as well as its bytes.
pub fn hash_path(path: &Path) -> Result<ContentHash, DirHashError> {
  if path.is_dir() {
    let tree = hash_directory(path)?;
    Ok(hash_bytes(format!("dir:{}", tree.0).as_bytes()))
  } else {
    let content = hash_file(path)?;
    let exec = if is_executable(path) { 'x' } else { '-' };
    Ok(hash_bytes(format!("file:{}:{}", exec, content.0).as_bytes()))
  }
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash(format!("{:x}", Sha256::digest(data)))
}
