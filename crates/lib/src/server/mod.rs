//! The build server: admission, execution and teardown of build runs.
//!
//! A [`BuildServer`] holds the project, the command registry and the catalog
//! of resolved builds, and runs at most one build at a time:
//!
//! ```text
//! Idle ──initialize──▶ Initialized ──start──▶ Running ──▶ Succeeded | Failed | Aborted
//!  ▲                        │                                          │
//!  └──────── abort ─────────┘◀─────────────── teardown ◀───────────────┘
//! ```
//!
//! - [`BuildServer::initialize`] is the only admission point. The busy check
//!   and the creation of the [`BuildProcess`] happen under one lock.
//! - [`BuildServer::start`] spawns the scheduler on its own tokio task.
//! - [`BuildServer::abort`] sets the run's abort flag and cancels running
//!   commands. Nothing is killed forcibly.
//! - Teardown publishes [`ServerEvent::BuildDone`] before the process is
//!   dropped, so subscribers see the final state, then signals idleness.
//!
//! Every observable change is published on the [`EventBus`].

mod error;
mod process;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::build::{Build, BuildCatalog, BuildNode};
use crate::command::{CommandArgs, CommandRegistry, CommandResult};
use crate::events::{EventBus, RequestContext, ServerEvent};
use crate::execute::{ExecutionPlan, NodeExecutor, run_plan};
use crate::placeholder::{KeySource, substitute, unresolved_tokens};
use crate::project::Project;

pub use error::ServerError;
pub use process::{BuildProcess, ProcessSnapshot, RunState, TaskRecord, TaskStates};

/// Handle to a build server. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct BuildServer {
  inner: Arc<Inner>,
}

struct Inner {
  name: String,
  project: Project,
  registry: CommandRegistry,
  catalog: RwLock<Arc<BuildCatalog>>,
  bus: EventBus,
  active: Mutex<Option<Arc<BuildProcess>>>,
  idle: watch::Sender<bool>,
}

impl BuildServer {
  /// Create a server with an empty catalog. Call [`BuildServer::load_builds`]
  /// once subscribers are attached so load errors reach them.
  pub fn new(name: impl Into<String>, project: Project, registry: CommandRegistry) -> Self {
    let (idle, _) = watch::channel(true);
    Self {
      inner: Arc::new(Inner {
        name: name.into(),
        project,
        registry,
        catalog: RwLock::new(Arc::new(BuildCatalog::default())),
        bus: EventBus::new(),
        active: Mutex::new(None),
        idle,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn project(&self) -> &Project {
    &self.inner.project
  }

  pub fn registry(&self) -> &CommandRegistry {
    &self.inner.registry
  }

  pub fn bus(&self) -> &EventBus {
    &self.inner.bus
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
    self.inner.bus.subscribe()
  }

  /// (Re)load the catalog from the project's builds root.
  ///
  /// Per-build failures are published as non-fatal errors and the remaining
  /// builds stay available. A missing builds directory is fatal.
  pub fn load_builds(&self) -> Result<Arc<BuildCatalog>, ServerError> {
    self.load_builds_from(self.inner.project.builds_root())
  }

  /// Load the catalog from `dir` instead of the project's builds root.
  pub fn load_builds_from(&self, dir: &Path) -> Result<Arc<BuildCatalog>, ServerError> {
    let catalog = match BuildCatalog::load(dir, &self.inner.registry) {
      Ok(catalog) => Arc::new(catalog),
      Err(e) => {
        self.raise_common_error(format!("Failed to load builds directory: {e}"), true);
        return Err(e.into());
      }
    };

    for (name, e) in catalog.failures() {
      self.raise_common_error(format!("Failed to load build '{name}': {e}"), false);
    }

    *self.inner.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog.clone();
    Ok(catalog)
  }

  /// Replace the catalog directly.
  pub fn set_catalog(&self, catalog: BuildCatalog) {
    *self.inner.catalog.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(catalog);
  }

  pub fn catalog(&self) -> Arc<BuildCatalog> {
    self.inner.catalog.read().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn find_build(&self, name: &str) -> Option<Arc<Build>> {
    self.catalog().get(name)
  }

  /// Admit `build` with positional `args`.
  ///
  /// Fails without side effects when a run is active, when fewer arguments
  /// than declared are given, or when an argument does not match its
  /// pattern. On success publishes `LogFileChanged` (when the build names a
  /// log file) and `BuildInitialized`.
  pub fn initialize(
    &self,
    context: RequestContext,
    build: Arc<Build>,
    args: &[String],
  ) -> Result<Arc<BuildProcess>, ServerError> {
    let process = {
      let mut active = self.inner.active();
      if let Some(current) = active.as_ref() {
        warn!(build = %build.name, active = %current.name(), "server is busy");
        return Err(ServerError::Busy {
          active: current.name().to_string(),
        });
      }

      validate_args(&build, args)?;

      let process = Arc::new(BuildProcess::new(build.clone(), build.bind_args(args)));
      *active = Some(process.clone());
      self.inner.idle.send_replace(false);
      process
    };

    info!(build = %build.name, args = ?process.args(), origin = %context.origin, "build initialized");

    if let Some(template) = build.log_file.as_deref() {
      let layers: [&dyn KeySource; 2] = [self.inner.project.keys(), process.args()];
      let path = substitute(template, &layers);
      self.inner.bus.publish(ServerEvent::LogFileChanged { path: Some(path) });
    }
    self.inner.bus.publish(ServerEvent::BuildInitialized {
      context,
      process: process.snapshot(),
    });

    Ok(process)
  }

  /// Look up a build by name and [`initialize`](Self::initialize) it.
  pub fn initialize_by_name(
    &self,
    context: RequestContext,
    name: &str,
    args: &[String],
  ) -> Result<Arc<BuildProcess>, ServerError> {
    let build = self
      .find_build(name)
      .ok_or_else(|| ServerError::BuildNotFound { name: name.to_string() })?;
    self.initialize(context, build, args)
  }

  /// Start the initialized build on its own task.
  ///
  /// The returned handle resolves to the terminal state once teardown is
  /// complete.
  pub fn start(&self) -> Result<JoinHandle<RunState>, ServerError> {
    let Some(process) = self.inner.active().clone() else {
      error!("no build to start");
      return Err(ServerError::NotInitialized);
    };

    if let Err(state) = process.begin() {
      error!(build = %process.name(), state = %state, "build already started");
      return Err(ServerError::AlreadyRunning {
        name: process.name().to_string(),
      });
    }

    let inner = self.inner.clone();
    Ok(tokio::spawn(async move { inner.drive(process).await }))
  }

  /// Request abort of the active run.
  ///
  /// A run that was initialized but never started is torn down right away.
  /// Returns `false` when no run is active.
  pub fn abort(&self) -> bool {
    let Some(process) = self.inner.active().clone() else {
      debug!("abort requested with no active build");
      return false;
    };

    if process.cancel_unstarted() {
      warn!(build = %process.name(), "build aborted before start");
      self.inner.teardown(&process, RunState::Aborted);
      return true;
    }

    let cancelled = process.request_abort();
    warn!(build = %process.name(), cancelled, "build abort requested");
    true
  }

  /// Abort any active run, wait until the server is idle, then publish `Stopped`.
  pub async fn stop(&self) {
    info!(server = %self.inner.name, "stopping");
    self.abort();
    self.wait_idle().await;
    self.inner.bus.publish(ServerEvent::Stopped);
    info!(server = %self.inner.name, "stopped");
  }

  /// Resolve once no run is active.
  pub async fn wait_idle(&self) {
    let mut idle = self.inner.idle.subscribe();
    // The sender lives as long as `self`, so this cannot fail.
    let _ = idle.wait_for(|idle| *idle).await;
  }

  pub fn is_busy(&self) -> bool {
    self.inner.active().is_some()
  }

  pub fn current_process(&self) -> Option<ProcessSnapshot> {
    self.inner.active().as_ref().map(|process| process.snapshot())
  }

  pub fn request_status(&self, context: RequestContext) {
    self.inner.bus.publish(ServerEvent::StatusRequested {
      context,
      process: self.current_process(),
    });
  }

  pub fn request_help(&self, context: RequestContext) {
    self.inner.bus.publish(ServerEvent::HelpRequested { context });
  }

  pub fn raise_common_error(&self, message: impl Into<String>, is_fatal: bool) {
    self.inner.raise_common_error(message.into(), is_fatal);
  }

  pub fn raise_common_message(&self, context: RequestContext, message: impl Into<String>) {
    self.inner.bus.publish(ServerEvent::CommonMessage {
      context,
      message: message.into(),
    });
  }
}

impl std::fmt::Debug for BuildServer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildServer")
      .field("name", &self.inner.name)
      .field("builds", &self.catalog().len())
      .field("active", &*self.inner.active())
      .finish()
  }
}

impl Inner {
  fn active(&self) -> MutexGuard<'_, Option<Arc<BuildProcess>>> {
    self.active.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn raise_common_error(&self, message: String, is_fatal: bool) {
    error!(is_fatal, "{message}");
    self.bus.publish(ServerEvent::CommonError { message, is_fatal });
  }

  async fn drive(self: Arc<Self>, process: Arc<BuildProcess>) -> RunState {
    let build = process.build().clone();
    info!(build = %build.name, nodes = build.nodes.len(), "build started");

    let state = if build.nodes.is_empty() {
      error!(build = %build.name, "build has no nodes");
      process.request_abort();
      RunState::Aborted
    } else {
      let plan = ExecutionPlan::from_nodes(&build.nodes);
      let executor = Arc::new(RunExecutor {
        inner: self.clone(),
        process: process.clone(),
      });
      let outcome = run_plan(&plan, &build.nodes, executor).await;

      for fault in &outcome.faults {
        self.raise_common_error(format!("Build '{}' faulted: {fault}", build.name), false);
      }

      debug!(
        build = %build.name,
        succeeded = outcome.succeeded,
        failed = outcome.failed,
        skipped = outcome.skipped,
        "scheduler finished"
      );

      if !outcome.faults.is_empty() {
        RunState::Failed
      } else if outcome.is_success() {
        RunState::Succeeded
      } else {
        RunState::Aborted
      }
    };

    self.teardown(&process, state);
    state
  }

  fn teardown(&self, process: &Arc<BuildProcess>, state: RunState) {
    process.finish(state);
    let snapshot = process.snapshot();
    match state {
      RunState::Succeeded => info!(build = %snapshot.name, duration = ?snapshot.duration(), "build succeeded"),
      _ => warn!(build = %snapshot.name, state = %state, "build did not succeed"),
    }

    self.bus.publish(ServerEvent::BuildDone {
      process: snapshot,
      success: state == RunState::Succeeded,
    });
    self.bus.publish(ServerEvent::LogFileChanged { path: None });

    {
      let mut active = self.active();
      if active.as_ref().is_some_and(|current| Arc::ptr_eq(current, process)) {
        *active = None;
      }
    }
    self.idle.send_replace(true);
    debug!(build = %process.name(), "build torn down");
  }
}

fn validate_args(build: &Build, args: &[String]) -> Result<(), ServerError> {
  if args.len() < build.args.len() {
    return Err(ServerError::ArgCountMismatch {
      expected: build.args.len(),
      actual: args.len(),
    });
  }

  for (index, (name, value)) in build.args.iter().zip(args).enumerate() {
    let Some(pattern) = build.arg_check(index) else {
      continue;
    };
    let regex = Regex::new(pattern).map_err(|source| ServerError::InvalidPattern {
      index,
      pattern: pattern.to_string(),
      source,
    })?;
    if !regex.is_match(value) {
      return Err(ServerError::ArgValidation {
        index,
        name: name.clone(),
        pattern: pattern.to_string(),
        value: value.clone(),
      });
    }
  }

  Ok(())
}

/// Runs nodes for one process: substitution, command lookup, bookkeeping.
struct RunExecutor {
  inner: Arc<Inner>,
  process: Arc<BuildProcess>,
}

impl RunExecutor {
  fn substitute_args(&self, node: &BuildNode) -> CommandArgs {
    let layers: [&dyn KeySource; 3] = [
      self.inner.project.keys(),
      self.process.args(),
      self.process.task_states(),
    ];
    node
      .args
      .iter()
      .map(|(key, template)| {
        let value = substitute(template, &layers);
        let unresolved = unresolved_tokens(&value);
        if !unresolved.is_empty() {
          debug!(node = %node.name, arg = %key, tokens = ?unresolved, "unresolved tokens left in argument");
        }
        (key.clone(), value)
      })
      .collect()
  }
}

#[async_trait]
impl NodeExecutor for RunExecutor {
  async fn execute_node(&self, index: usize, node: Arc<BuildNode>) -> bool {
    let build = self.process.name().to_string();
    let position = self.process.task_started(&node.name);
    self.inner.bus.publish(ServerEvent::TaskStarted {
      build: build.clone(),
      index,
      node: node.name.clone(),
    });
    debug!(build = %build, node = %node.name, command = %node.command, "node started");

    let result = match self.inner.registry.create(&node.command) {
      Some(command) => {
        let id = self.process.register_command(command.clone());
        let args = self.substitute_args(&node);
        let result = command.execute(&args).await;
        self.process.unregister_command(id);
        result
      }
      None => CommandResult::fail(format!("Command '{}' is not registered", node.command)),
    };

    let success = result.success;
    if !success && !result.silent {
      self
        .inner
        .raise_common_error(format!("Node '{}' failed: {}", node.name, result.message), false);
    } else if !success {
      debug!(build = %build, node = %node.name, "node failed silently");
    }

    if let Some(record) = self.process.task_finished(position, result) {
      debug!(build = %build, node = %node.name, success, duration = ?record.duration(), "node finished");
      self.inner.bus.publish(ServerEvent::TaskDone { build, index, record });
    }

    success
  }

  fn is_aborted(&self) -> bool {
    self.process.is_aborted()
  }

  fn request_abort(&self) {
    self.process.request_abort();
  }

  fn step_joined(&self) {
    let published = self.process.task_states().commit();
    trace!(build = %self.process.name(), published, "task states committed");
  }
}
