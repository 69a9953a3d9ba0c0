//! Live state of one build run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::build::Build;
use crate::command::{Command, CommandResult};
use crate::placeholder::KeySource;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
  Initialized,
  Running,
  Succeeded,
  /// The scheduler itself faulted.
  Failed,
  /// A node failed or abort was requested.
  Aborted,
}

impl RunState {
  pub fn is_finished(self) -> bool {
    matches!(self, RunState::Succeeded | RunState::Failed | RunState::Aborted)
  }
}

impl std::fmt::Display for RunState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      RunState::Initialized => "initialized",
      RunState::Running => "running",
      RunState::Succeeded => "succeeded",
      RunState::Failed => "failed",
      RunState::Aborted => "aborted",
    };
    f.write_str(label)
  }
}

/// One node execution within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
  pub node: String,
  pub started_at: SystemTime,
  pub finished_at: Option<SystemTime>,
  /// `None` while the node is still running.
  pub result: Option<CommandResult>,
}

impl TaskRecord {
  pub fn duration(&self) -> Option<Duration> {
    self.finished_at?.duration_since(self.started_at).ok()
  }

  pub fn is_success(&self) -> bool {
    self.result.as_ref().is_some_and(|result| result.success)
  }
}

/// Point-in-time copy of a [`BuildProcess`], safe to hand to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
  pub name: String,
  pub args: Vec<(String, String)>,
  pub state: RunState,
  pub node_count: usize,
  pub started_at: Option<SystemTime>,
  pub finished_at: Option<SystemTime>,
  pub tasks: Vec<TaskRecord>,
}

impl ProcessSnapshot {
  /// Wall time of the run, or of the run so far while it is active.
  pub fn duration(&self) -> Option<Duration> {
    let started = self.started_at?;
    let end = self.finished_at.unwrap_or_else(SystemTime::now);
    end.duration_since(started).ok()
  }

  /// Tasks that finished, successfully or not.
  pub fn completed_tasks(&self) -> usize {
    self.tasks.iter().filter(|task| task.result.is_some()).count()
  }
}

/// Per-run store of node outputs: `<node>:message` and `<node>:result`.
///
/// Outputs are staged when a node completes and become readable only once
/// [`TaskStates::commit`] runs at the end of the scheduler step that
/// produced them. Nodes of one parallel batch, queue members included,
/// never see each other's outputs.
#[derive(Debug, Default)]
pub struct TaskStates {
  values: RwLock<HashMap<String, String>>,
  staged: Mutex<Vec<(String, String)>>,
}

impl TaskStates {
  /// Stage the outputs of `node`. Invisible until the next commit.
  pub fn record(&self, node: &str, result: &CommandResult) {
    let mut staged = self.staged.lock().unwrap_or_else(PoisonError::into_inner);
    staged.push((format!("{node}:message"), result.message.clone()));
    staged.push((format!("{node}:result"), result.result.clone().unwrap_or_default()));
  }

  /// Publish everything staged, in completion order. Returns the number of
  /// keys written.
  pub fn commit(&self) -> usize {
    let staged = std::mem::take(&mut *self.staged.lock().unwrap_or_else(PoisonError::into_inner));
    let count = staged.len();
    if count > 0 {
      self.values.write().unwrap_or_else(PoisonError::into_inner).extend(staged);
    }
    count
  }

  pub fn get(&self, key: &str) -> Option<String> {
    self
      .values
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(key)
      .cloned()
  }

  pub fn len(&self) -> usize {
    self.values.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl KeySource for TaskStates {
  fn visit(&self, f: &mut dyn FnMut(&str, &str)) {
    let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
    for (key, value) in values.iter() {
      f(key, value);
    }
  }
}

#[derive(Debug)]
struct Timeline {
  state: RunState,
  started_at: Option<SystemTime>,
  finished_at: Option<SystemTime>,
  tasks: Vec<TaskRecord>,
}

/// The single active run of a server.
///
/// Owns everything scoped to the run: bound arguments, the task-state store
/// and the set of commands currently executing. Dropping the process after
/// teardown discards all of it.
pub struct BuildProcess {
  build: Arc<Build>,
  args: Vec<(String, String)>,
  timeline: Mutex<Timeline>,
  aborted: AtomicBool,
  task_states: TaskStates,
  running: Mutex<Vec<(u64, Arc<dyn Command>)>>,
  next_command_id: AtomicU64,
}

impl BuildProcess {
  pub fn new(build: Arc<Build>, args: Vec<(String, String)>) -> Self {
    Self {
      build,
      args,
      timeline: Mutex::new(Timeline {
        state: RunState::Initialized,
        started_at: None,
        finished_at: None,
        tasks: Vec::new(),
      }),
      aborted: AtomicBool::new(false),
      task_states: TaskStates::default(),
      running: Mutex::new(Vec::new()),
      next_command_id: AtomicU64::new(0),
    }
  }

  pub fn name(&self) -> &str {
    &self.build.name
  }

  pub fn build(&self) -> &Arc<Build> {
    &self.build
  }

  /// Arguments bound to their declared names.
  pub fn args(&self) -> &Vec<(String, String)> {
    &self.args
  }

  pub fn task_states(&self) -> &TaskStates {
    &self.task_states
  }

  pub fn state(&self) -> RunState {
    self.timeline().state
  }

  pub fn is_aborted(&self) -> bool {
    self.aborted.load(Ordering::SeqCst)
  }

  /// Move `Initialized → Running`. Returns the current state on failure.
  pub fn begin(&self) -> Result<(), RunState> {
    let mut timeline = self.timeline();
    if timeline.state != RunState::Initialized {
      return Err(timeline.state);
    }
    timeline.state = RunState::Running;
    timeline.started_at = Some(SystemTime::now());
    Ok(())
  }

  /// Move `Initialized → Aborted` for a run that never started.
  pub fn cancel_unstarted(&self) -> bool {
    let mut timeline = self.timeline();
    if timeline.state != RunState::Initialized {
      return false;
    }
    self.aborted.store(true, Ordering::SeqCst);
    timeline.state = RunState::Aborted;
    timeline.finished_at = Some(SystemTime::now());
    true
  }

  /// Record the terminal state.
  pub fn finish(&self, state: RunState) {
    let mut timeline = self.timeline();
    timeline.state = state;
    timeline.finished_at = Some(SystemTime::now());
  }

  /// Set the abort flag and cancel every running command.
  ///
  /// Returns how many commands were asked to cancel.
  pub fn request_abort(&self) -> usize {
    self.aborted.store(true, Ordering::SeqCst);
    let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
    for (_, command) in running.iter() {
      command.cancel();
    }
    running.len()
  }

  /// Track a command for cancellation. Cancels it right away if the run is
  /// already aborting.
  pub fn register_command(&self, command: Arc<dyn Command>) -> u64 {
    let id = self.next_command_id.fetch_add(1, Ordering::SeqCst);
    let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
    if self.is_aborted() {
      command.cancel();
    }
    running.push((id, command));
    id
  }

  pub fn unregister_command(&self, id: u64) {
    self
      .running
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .retain(|(running_id, _)| *running_id != id);
  }

  pub fn running_commands(&self) -> usize {
    self.running.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  /// Append a record for a node that just started. Returns its position.
  pub fn task_started(&self, node: &str) -> usize {
    let mut timeline = self.timeline();
    timeline.tasks.push(TaskRecord {
      node: node.to_string(),
      started_at: SystemTime::now(),
      finished_at: None,
      result: None,
    });
    timeline.tasks.len() - 1
  }

  /// Complete the record at `position` and stage the node's outputs in the
  /// task-state store.
  pub fn task_finished(&self, position: usize, result: CommandResult) -> Option<TaskRecord> {
    let record = {
      let mut timeline = self.timeline();
      let record = timeline.tasks.get_mut(position)?;
      record.finished_at = Some(SystemTime::now());
      record.result = Some(result.clone());
      record.clone()
    };
    self.task_states.record(&record.node, &result);
    debug!(node = %record.node, success = result.success, "task state staged");
    Some(record)
  }

  pub fn snapshot(&self) -> ProcessSnapshot {
    let timeline = self.timeline();
    ProcessSnapshot {
      name: self.build.name.clone(),
      args: self.args.clone(),
      state: timeline.state,
      node_count: self.build.nodes.len(),
      started_at: timeline.started_at,
      finished_at: timeline.finished_at,
      tasks: timeline.tasks.clone(),
    }
  }

  fn timeline(&self) -> MutexGuard<'_, Timeline> {
    self.timeline.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl std::fmt::Debug for BuildProcess {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BuildProcess")
      .field("build", &self.build.name)
      .field("state", &self.state())
      .field("aborted", &self.is_aborted())
      .field("running_commands", &self.running_commands())
      .finish()
  }
}
