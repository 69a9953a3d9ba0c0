//! Server event fan-out.
//!
//! The server publishes every observable change on a broadcast channel.
//! Front ends, the statistics recorder and tests subscribe independently;
//! publishing never blocks and never fails when nobody listens.
//!
//! A subscriber that falls more than [`EVENT_CAPACITY`] events behind
//! receives `RecvError::Lagged` and skips ahead.

use tokio::sync::broadcast;
use tracing::trace;

use crate::server::{ProcessSnapshot, TaskRecord};

/// Events kept per subscriber before older ones are dropped.
pub const EVENT_CAPACITY: usize = 256;

/// Identifies where a request came from, so views can answer their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestContext {
  pub origin: String,
}

impl RequestContext {
  pub fn new(origin: impl Into<String>) -> Self {
    Self { origin: origin.into() }
  }
}

/// Something observable happened in the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
  /// A build was admitted and is about to start.
  BuildInitialized {
    context: RequestContext,
    process: ProcessSnapshot,
  },
  /// A run finished and is being torn down.
  BuildDone { process: ProcessSnapshot, success: bool },
  StatusRequested {
    context: RequestContext,
    process: Option<ProcessSnapshot>,
  },
  HelpRequested { context: RequestContext },
  /// `is_fatal` is advisory; the server keeps running either way.
  CommonError { message: String, is_fatal: bool },
  CommonMessage { context: RequestContext, message: String },
  /// The active log file changed. `None` once a run is over.
  LogFileChanged { path: Option<String> },
  /// The server stopped and no run is active.
  Stopped,
  TaskStarted { build: String, index: usize, node: String },
  TaskDone { build: String, index: usize, record: TaskRecord },
}

/// Broadcast bus for [`ServerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
  sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
  pub fn new() -> Self {
    let (sender, _) = broadcast::channel(EVENT_CAPACITY);
    Self { sender }
  }

  /// Receive every event published from now on.
  pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
    self.sender.subscribe()
  }

  /// Publish to all current subscribers.
  pub fn publish(&self, event: ServerEvent) {
    trace!(event = ?event, "publish");
    // No subscribers is not an error.
    let _ = self.sender.send(event);
  }

  pub fn subscriber_count(&self) -> usize {
    self.sender.receiver_count()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}
