//! File-based per-key locks for layer writes.
//!
//! Two builds that need the same layer serialize on `locks/<key>.lock`; the
//! second one to get the lock finds the layer committed and reuses it.
//! Lock files are never deleted, so every writer always locks the same inode.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub key: String,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error("layer {key} is being written by another build (PID {pid}, started at unix time {started_at_unix})")]
  Contention { key: String, pid: u32, started_at_unix: u64 },

  #[error("layer {key} is being written by another build (lock metadata unreadable: {lock_path})")]
  ContentionUnknown { key: String, lock_path: PathBuf },

  #[error("Failed to create lock directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("Failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("Failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("Failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

impl StoreLockError {
  pub fn is_contention(&self) -> bool {
    matches!(
      self,
      StoreLockError::Contention { .. } | StoreLockError::ContentionUnknown { .. }
    )
  }
}

/// An exclusive lock on one cache key, released on drop.
#[derive(Debug)]
pub struct KeyLock {
  file: File,
  lock_path: PathBuf,
}

impl KeyLock {
  /// Try to take the lock without waiting.
  ///
  /// Returns a contention error naming the holder when another process or
  /// build already has it.
  pub fn try_acquire(locks_dir: &Path, key: &str) -> Result<Self, StoreLockError> {
    let (file, lock_path) = Self::open(locks_dir, key)?;

    if let Err(err) = lock(&file, false) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(&lock_path, key));
      }
      return Err(StoreLockError::LockFailed(err));
    }

    Self::write_metadata(&file, key)?;
    Ok(KeyLock { file, lock_path })
  }

  /// Take the lock, blocking the calling thread until it is free.
  pub fn acquire_blocking(locks_dir: &Path, key: &str) -> Result<Self, StoreLockError> {
    let (file, lock_path) = Self::open(locks_dir, key)?;
    lock(&file, true).map_err(StoreLockError::LockFailed)?;
    Self::write_metadata(&file, key)?;
    Ok(KeyLock { file, lock_path })
  }

  /// Reads the lock metadata from the held file handle.
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }

  fn open(locks_dir: &Path, key: &str) -> Result<(File, PathBuf), StoreLockError> {
    std::fs::create_dir_all(locks_dir).map_err(StoreLockError::CreateDir)?;
    let lock_path = locks_dir.join(format!("{}.lock", key));

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(StoreLockError::OpenFile)?;

    Ok((file, lock_path))
  }

  fn write_metadata(file: &File, key: &str) -> Result<(), StoreLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      key: key.to_string(),
    };

    file.set_len(0).map_err(StoreLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, &metadata).map_err(|e| StoreLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(StoreLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path, key: &str) -> StoreLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        return StoreLockError::Contention {
          key: key.to_string(),
          pid: metadata.pid,
          started_at_unix: metadata.started_at_unix,
        };
      }
    }

    StoreLockError::ContentionUnknown {
      key: key.to_string(),
      lock_path: lock_path.to_path_buf(),
    }
  }
}

#[cfg(unix)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = if blocking {
    FlockOperation::LockExclusive
  } else {
    FlockOperation::NonBlockingLockExclusive
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = if blocking {
    LOCKFILE_EXCLUSIVE_LOCK
  } else {
    LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK
  };

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
