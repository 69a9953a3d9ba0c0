use thiserror::Error;

use crate::build::BuildError;

/// Errors returned by [`BuildServer`](super::BuildServer) operations.
///
/// None of them changes server state: a rejected request leaves the server
/// exactly as it was.
#[derive(Debug, Error)]
pub enum ServerError {
  /// A build is already initialized or running.
  #[error("server is busy with build '{active}'")]
  Busy { active: String },

  /// Fewer positional arguments than the build declares.
  #[error("build requires {expected} args, but {actual} provided")]
  ArgCountMismatch { expected: usize, actual: usize },

  /// An argument does not match its validation pattern.
  #[error("argument {index} '{name}' is invalid: '{value}' does not match '{pattern}'")]
  ArgValidation {
    index: usize,
    name: String,
    pattern: String,
    value: String,
  },

  /// A validation pattern is not a valid regular expression.
  #[error("argument {index} has an invalid pattern '{pattern}': {source}")]
  InvalidPattern {
    index: usize,
    pattern: String,
    #[source]
    source: regex::Error,
  },

  #[error("build '{name}' not found")]
  BuildNotFound { name: String },

  #[error("no build initialized")]
  NotInitialized,

  #[error("build '{name}' already started")]
  AlreadyRunning { name: String },

  /// The builds directory could not be loaded.
  #[error(transparent)]
  Builds(#[from] BuildError),
}
