use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or resolving build definitions.
///
/// Every variant except [`BuildError::MissingBuildsDir`] is scoped to one
/// build: the catalog records it and keeps loading the others.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The builds directory does not exist or is not a directory.
  #[error("builds directory not found: {}", path.display())]
  MissingBuildsDir { path: PathBuf },

  /// A definition file could not be read.
  #[error("failed to read build definition {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// A definition file is not valid JSON for the definition schema.
  #[error("failed to parse build definition {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// A definition is structurally invalid.
  #[error("invalid build '{build}': {message}")]
  Config { build: String, message: String },

  /// Two nodes of one build share a name, in its file or after inlining.
  #[error("build '{build}' has duplicate node name '{node}'")]
  DuplicateNode { build: String, node: String },

  /// A node names a command that is not registered.
  #[error("node '{node}' uses unknown command '{command}'")]
  CommandNotFound { node: String, command: String },

  /// A sub-build node references a build that does not exist or failed to load.
  #[error("sub-build '{name}' not found")]
  SubBuildNotFound { name: String },

  /// Sub-build references form a cycle.
  #[error("cyclic sub-build reference: {}", .chain.join(" -> "))]
  CyclicSubBuild { chain: Vec<String> },
}
