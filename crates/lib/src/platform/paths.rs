use crate::consts::{APP_NAME, DATA_DIR_ENV};
use std::path::PathBuf;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for data files for the application.
///
/// `TASKFORGE_DATA_DIR` overrides the platform default. Without a usable
/// home directory the data lives in `./.taskforge`.
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
    return PathBuf::from(dir);
  }
  std::env::var_os("APPDATA")
    .map(|appdata| PathBuf::from(appdata).join(APP_NAME))
    .unwrap_or_else(fallback_dir)
}

/// Returns the directory for data files for the application.
///
/// `TASKFORGE_DATA_DIR` overrides the platform default. Without a usable
/// home directory the data lives in `./.taskforge`.
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
    return PathBuf::from(dir);
  }
  std::env::var_os("XDG_DATA_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|home| home.join(".local").join("share")))
    .map(|data_home| data_home.join(APP_NAME))
    .unwrap_or_else(fallback_dir)
}

/// Default location of the run statistics file.
pub fn stats_file() -> PathBuf {
  data_dir().join("stats.json")
}

fn fallback_dir() -> PathBuf {
  PathBuf::from(".").join(format!(".{APP_NAME}"))
}
