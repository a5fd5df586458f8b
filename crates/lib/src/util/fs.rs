//! Filesystem tree helpers.
//!
//! Symlinks are always copied as links, never followed, so a copied tree
//! is byte-for-byte the same shape as its source.
//!
//! Directory permissions are restored only after a copy has written every
//! child, so read-only directories copy (and later delete) cleanly without
//! root.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

/// Cross-platform symlink creation.
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
  #[cfg(unix)]
  {
    std::os::unix::fs::symlink(target, link)
  }
  #[cfg(windows)]
  {
    let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
    if resolved.is_dir() {
      std::os::windows::fs::symlink_dir(target, link)
    } else {
      std::os::windows::fs::symlink_file(target, link)
    }
  }
}

/// Permissions that keep `perms` but let the owner write.
fn owner_writable(perms: &fs::Permissions) -> fs::Permissions {
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    fs::Permissions::from_mode(perms.mode() | 0o700)
  }
  #[cfg(not(unix))]
  {
    let mut perms = perms.clone();
    perms.set_readonly(false);
    perms
  }
}

/// Directory permissions held back until a copy into them has finished.
///
/// [`DirModes::defer`] leaves a directory owner-writable for the duration of
/// the copy; [`DirModes::apply`] sets the recorded permissions deepest first.
#[derive(Debug, Default)]
pub struct DirModes {
  pending: BTreeMap<PathBuf, fs::Permissions>,
}

impl DirModes {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make `dir` writable now and give it `perms` on [`DirModes::apply`].
  ///
  /// The first recorded permissions for a directory win.
  pub fn defer(&mut self, dir: &Path, perms: fs::Permissions) -> io::Result<()> {
    let writable = owner_writable(&perms);
    if fs::metadata(dir)?.permissions() != writable {
      fs::set_permissions(dir, writable)?;
    }
    self.pending.entry(dir.to_path_buf()).or_insert(perms);
    Ok(())
  }

  /// Like [`DirModes::defer`], keeping the directory's current permissions.
  pub fn hold(&mut self, dir: &Path) -> io::Result<()> {
    let perms = fs::metadata(dir)?.permissions();
    self.defer(dir, perms)
  }

  pub fn apply(self) -> io::Result<()> {
    let mut pending: Vec<_> = self.pending.into_iter().collect();
    pending.sort_by_key(|(path, _)| Reverse(path.components().count()));
    for (path, perms) in pending {
      fs::set_permissions(&path, perms)?;
    }
    Ok(())
  }
}

/// Make every directory at or below `path` owner-writable so the tree can be
/// deleted. Symlinks are not followed; a missing path is not an error.
pub fn make_tree_writable(path: &Path) -> io::Result<()> {
  let meta = match fs::symlink_metadata(path) {
    Ok(meta) => meta,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(e),
  };
  if meta.file_type().is_symlink() || (!meta.is_dir() && cfg!(unix)) {
    return Ok(());
  }

  let writable = owner_writable(&meta.permissions());
  if writable != meta.permissions() {
    fs::set_permissions(path, writable)?;
  }
  if meta.is_dir() {
    for entry in fs::read_dir(path)? {
      make_tree_writable(&entry?.path())?;
    }
  }
  Ok(())
}

/// Remove whatever exists at `path` without following a final symlink.
///
/// Missing paths are not an error. Read-only directories inside `path` are
/// made writable first; `path`'s own parent must already be writable.
pub fn remove_path(path: &Path) -> io::Result<()> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => {
      make_tree_writable(path)?;
      fs::remove_dir_all(path)
    }
    Ok(_) => fs::remove_file(path),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Copy a single entry (file, directory or symlink) to `dst`.
///
/// Directories are created but not descended into; their permissions are
/// deferred to `modes`. An existing entry of a different type at `dst` is
/// replaced.
pub fn copy_entry(src: &Path, dst: &Path, modes: &mut DirModes) -> io::Result<()> {
  let meta = fs::symlink_metadata(src)?;
  if let Some(parent) = dst.parent() {
    fs::create_dir_all(parent)?;
  }

  if meta.is_dir() {
    if let Ok(existing) = fs::symlink_metadata(dst)
      && !existing.is_dir()
    {
      fs::remove_file(dst)?;
    }
    fs::create_dir_all(dst)?;
    modes.defer(dst, meta.permissions())?;
  } else if meta.file_type().is_symlink() {
    remove_path(dst)?;
    symlink(&fs::read_link(src)?, dst)?;
  } else {
    remove_path(dst)?;
    fs::copy(src, dst)?;
  }
  Ok(())
}

/// Recursively copy the contents of `src` into `dst`, overlaying whatever
/// is already there.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
  fs::create_dir_all(dst)?;
  let mut modes = DirModes::new();
  modes.hold(dst)?;
  for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
    copy_entry(entry.path(), &dst.join(rel), &mut modes)?;
  }
  modes.apply()
}

/// Copy `src` to `dst`, recursing when `src` is a directory. Symlinks at the
/// top level are followed; nested symlinks are copied as links.
pub fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
  if src.is_dir() {
    copy_tree(src, dst)
  } else {
    if let Some(parent) = dst.parent() {
      fs::create_dir_all(parent)?;
    }
    remove_path(dst)?;
    fs::copy(src, dst)?;
    Ok(())
  }
}

/// Lexically normalize an in-image path to a relative path below the image
/// root. `..` never climbs above the root.
pub fn image_relative(path: &str) -> PathBuf {
  let mut out = PathBuf::new();
  for component in Path::new(path).components() {
    match component {
      Component::Normal(part) => out.push(part),
      Component::ParentDir => {
        out.pop();
      }
      Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
    }
  }
  out
}

/// Forward-slash relative path string, stable across platforms.
pub fn rel_string(path: &Path) -> String {
  path
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

/// Unix permission bits, or 0 where the platform has none.
pub fn file_mode(meta: &fs::Metadata) -> u32 {
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
  }
  #[cfg(not(unix))]
  {
    let _ = meta;
    0
  }
}
