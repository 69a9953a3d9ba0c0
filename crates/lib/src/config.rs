//! Server configuration.
//!
//! Values given explicitly (CLI flags) win. Otherwise:
//!
//! - project files come from `TASKFORGE_PROJECT` (a `PATH`-style list), then
//!   `taskforge.json` in the working directory
//! - the statistics file comes from `TASKFORGE_STATS`, then
//!   `<data dir>/stats.json`

use std::path::PathBuf;

use crate::consts::{APP_NAME, DEFAULT_PROJECT_FILE, PROJECT_ENV, STATS_ENV};
use crate::platform::paths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
  /// Name reported by the server.
  pub name: String,
  /// Project files, merged in order.
  pub project_files: Vec<PathBuf>,
  /// Where run statistics are kept.
  pub stats_file: PathBuf,
}

impl ServerConfig {
  /// Build a config from explicit values, filling gaps from the environment.
  pub fn resolve(project_files: Vec<PathBuf>, stats_file: Option<PathBuf>) -> Self {
    let project_files = if project_files.is_empty() {
      project_files_from_env().unwrap_or_else(|| vec![PathBuf::from(DEFAULT_PROJECT_FILE)])
    } else {
      project_files
    };

    let stats_file = stats_file
      .or_else(|| std::env::var_os(STATS_ENV).filter(|v| !v.is_empty()).map(PathBuf::from))
      .unwrap_or_else(paths::stats_file);

    Self {
      name: APP_NAME.to_string(),
      project_files,
      stats_file,
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self::resolve(Vec::new(), None)
  }
}

fn project_files_from_env() -> Option<Vec<PathBuf>> {
  let raw = std::env::var_os(PROJECT_ENV)?;
  let files: Vec<PathBuf> = std::env::split_paths(&raw)
    .filter(|path| !path.as_os_str().is_empty())
    .collect();
  (!files.is_empty()).then_some(files)
}
