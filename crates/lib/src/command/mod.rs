//! The command contract.
//!
//! A command is the unit of work behind a build node. The scheduler and the
//! orchestrator only ever see this contract:
//!
//! - `execute` receives the node's substituted argument map and always
//!   returns a [`CommandResult`]. Faults inside the command (I/O errors,
//!   spawn failures) must be converted into a failed result.
//! - `cancel` is an optional capability. The orchestrator calls it on every
//!   running command when a run is aborted. The default does nothing.

pub mod builtin;
pub mod registry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use registry::{CommandFactory, CommandRegistry};

/// Substituted arguments handed to a command.
pub type CommandArgs = BTreeMap<String, String>;

/// Outcome of a single command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
  /// Whether the command succeeded.
  pub success: bool,
  /// Human-readable description of what happened.
  pub message: String,
  /// Optional machine-usable output, exposed to later nodes as `{<node>:result}`.
  pub result: Option<String>,
  /// A silent failure still aborts the run but is not reported as an error.
  pub silent: bool,
}

impl CommandResult {
  pub fn success(message: impl Into<String>) -> Self {
    Self {
      success: true,
      message: message.into(),
      result: None,
      silent: false,
    }
  }

  pub fn fail(message: impl Into<String>) -> Self {
    Self {
      success: false,
      message: message.into(),
      result: None,
      silent: false,
    }
  }

  pub fn fail_silent(message: impl Into<String>, silent: bool) -> Self {
    Self {
      silent,
      ..Self::fail(message)
    }
  }

  pub fn with_result(mut self, result: impl Into<String>) -> Self {
    self.result = Some(result.into());
    self
  }
}

/// A task implementation invoked by the scheduler.
#[async_trait]
pub trait Command: Send + Sync {
  /// Run the command with substituted arguments.
  async fn execute(&self, args: &CommandArgs) -> CommandResult;

  /// Ask a running `execute` to stop early. Must be safe to call at any time.
  fn cancel(&self) {}
}

/// Parse a boolean argument the way build definitions write them
/// (`true`/`false`, case-insensitive).
pub fn parse_flag(value: &str) -> Option<bool> {
  match value.trim().to_ascii_lowercase().as_str() {
    "true" => Some(true),
    "false" => Some(false),
    _ => None,
  }
}

/// Read an optional boolean argument, falling back to `default` when absent or empty.
pub fn flag_arg(args: &CommandArgs, key: &str, default: bool) -> Result<bool, String> {
  match args.get(key).map(String::as_str) {
    None | Some("") => Ok(default),
    Some(raw) => parse_flag(raw).ok_or_else(|| format!("argument '{key}' is not a boolean: '{raw}'")),
  }
}

/// Read a non-empty argument.
pub fn required_arg<'a>(args: &'a CommandArgs, key: &str) -> Option<&'a str> {
  args.get(key).map(String::as_str).filter(|value| !value.is_empty())
}
