//! Project settings: global substitution keys and the builds root.
//!
//! A project is assembled from one or more JSON files:
//!
//! ```json
//! {
//!   "buildsRoot": "builds",
//!   "keys": { "root": "/srv/app", "logs": "/var/log/app" }
//! }
//! ```
//!
//! Files are applied in order. Later files override keys of earlier ones and
//! the last file that names `buildsRoot` wins. A relative `buildsRoot` is
//! resolved against the directory of the file that declared it. Without any
//! `buildsRoot` the builds live in `builds/` next to the first file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Directory name used when no file sets `buildsRoot`.
pub const DEFAULT_BUILDS_DIR: &str = "builds";

#[derive(Debug, Error)]
pub enum ProjectError {
  #[error("no project files given")]
  NoFiles,

  #[error("failed to read project file {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse project file {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
struct ProjectFile {
  builds_root: Option<String>,
  keys: BTreeMap<String, String>,
}

/// Immutable project settings, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
  keys: BTreeMap<String, String>,
  builds_root: PathBuf,
}

impl Project {
  pub fn new(keys: BTreeMap<String, String>, builds_root: impl Into<PathBuf>) -> Self {
    Self {
      keys,
      builds_root: builds_root.into(),
    }
  }

  /// Merge the given project files in order.
  pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ProjectError> {
    let first = paths.first().ok_or(ProjectError::NoFiles)?.as_ref();
    let mut keys = BTreeMap::new();
    let mut builds_root = base_dir(first).join(DEFAULT_BUILDS_DIR);

    for path in paths {
      let path = path.as_ref();
      let content = std::fs::read_to_string(path).map_err(|source| ProjectError::Read {
        path: path.to_path_buf(),
        source,
      })?;
      let file: ProjectFile = serde_json::from_str(&content).map_err(|source| ProjectError::Parse {
        path: path.to_path_buf(),
        source,
      })?;

      debug!(path = %path.display(), keys = file.keys.len(), "loaded project file");
      if let Some(root) = file.builds_root.filter(|root| !root.is_empty()) {
        builds_root = base_dir(path).join(root);
      }
      keys.extend(file.keys);
    }

    Ok(Self { keys, builds_root })
  }

  /// Global substitution keys.
  pub fn keys(&self) -> &BTreeMap<String, String> {
    &self.keys
  }

  pub fn key(&self, name: &str) -> Option<&str> {
    self.keys.get(name).map(String::as_str)
  }

  pub fn builds_root(&self) -> &Path {
    &self.builds_root
  }
}

fn base_dir(path: &Path) -> PathBuf {
  match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
    _ => PathBuf::from("."),
  }
}
