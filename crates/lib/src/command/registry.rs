//! Name → constructor table for commands.
//!
//! The registry is assembled once at startup and is read-only afterwards.
//! Every node execution gets a fresh command object from its factory, so a
//! command may keep per-execution state (a child process handle, a cancel
//! signal) without leaking it across nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::Command;
use super::builtin::{CheckCommand, CopyFileCommand, DeleteDirCommand, RunCommand};

/// Constructs a new command instance.
pub type CommandFactory = Arc<dyn Fn() -> Arc<dyn Command> + Send + Sync>;

/// Registry of available commands, keyed by the name build nodes use.
#[derive(Clone, Default)]
pub struct CommandRegistry {
  factories: Arc<BTreeMap<String, CommandFactory>>,
}

impl CommandRegistry {
  /// Create an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with the built-in commands: `check`, `copy_file`, `delete_dir`, `run`.
  pub fn builtin() -> Self {
    Self::new()
      .with_command("check", || Arc::new(CheckCommand))
      .with_command("copy_file", || Arc::new(CopyFileCommand))
      .with_command("delete_dir", || Arc::new(DeleteDirCommand))
      .with_command("run", || Arc::new(RunCommand::new()))
  }

  /// Register a command constructor. A later registration replaces an earlier one.
  pub fn with_command<F>(mut self, name: &str, factory: F) -> Self
  where
    F: Fn() -> Arc<dyn Command> + Send + Sync + 'static,
  {
    Arc::make_mut(&mut self.factories).insert(name.to_string(), Arc::new(factory));
    self
  }

  /// Whether a command with this name is registered.
  pub fn contains(&self, name: &str) -> bool {
    self.factories.contains_key(name)
  }

  /// Construct a new instance of the named command.
  pub fn create(&self, name: &str) -> Option<Arc<dyn Command>> {
    self.factories.get(name).map(|factory| factory())
  }

  /// Registered command names, sorted.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.factories.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.factories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.factories.is_empty()
  }
}

impl std::fmt::Debug for CommandRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CommandRegistry")
      .field("commands", &self.factories.keys().collect::<Vec<_>>())
      .finish()
  }
}
