use crate::consts::APP_NAME;
use std::path::PathBuf;

/// Environment variable overriding the layer store location.
pub const STORE_ENV: &str = "LAYERBUILD_STORE";

/// Returns the user's home directory, or the temp dir if it is unset.
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var_os("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the user's home directory, or the temp dir if it is unset.
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  let appdata = std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|| home_dir().join("AppData").join("Roaming"));
  appdata.join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the layer store root.
///
/// `LAYERBUILD_STORE` wins; otherwise `<data_dir>/store`.
pub fn store_dir() -> PathBuf {
  if let Ok(path) = std::env::var(STORE_ENV)
    && !path.is_empty()
  {
    return PathBuf::from(path);
  }
  data_dir().join("store")
}
