//! Task scheduling for a single run.
//!
//! The scheduler walks an [`ExecutionPlan`] along a sequential spine:
//!
//! - a [`Step::Node`] runs alone and is awaited before the spine moves on
//! - a [`Step::Batch`] forks one task per [`Lane`] on a [`JoinSet`] and joins
//!   them all before the spine moves on
//!
//! Within a [`Lane::Queue`] members run in list order. Lanes of one batch are
//! unordered relative to each other.
//!
//! # Failure handling
//!
//! A node that reports failure makes the scheduler call
//! [`NodeExecutor::request_abort`]. Siblings that already started finish on
//! their own; no later step starts, and a queue does not start its next
//! member. A panicking node is a fault: it is recorded in
//! [`PlanOutcome::faults`] and also aborts the run.
//!
//! # Visibility
//!
//! Every step ends at a join boundary, after which the scheduler calls
//! [`NodeExecutor::step_joined`]. Executors publish node outputs there, so
//! a node only sees outputs of steps that completed before its own step
//! started. Lanes of one batch, and members of one queue, never observe
//! each other mid-batch.
//!
//! What running a node means (substitution, command lookup, state updates)
//! is up to the [`NodeExecutor`].

pub mod plan;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::build::BuildNode;

pub use plan::{ExecutionPlan, Lane, Step};

/// Runs individual nodes on behalf of the scheduler.
#[async_trait]
pub trait NodeExecutor: Send + Sync + 'static {
  /// Execute one node. Returns whether it succeeded.
  async fn execute_node(&self, index: usize, node: Arc<BuildNode>) -> bool;

  /// Whether the run has been asked to stop.
  fn is_aborted(&self) -> bool;

  /// Ask the run to stop. Must be idempotent.
  fn request_abort(&self);

  /// Called once every lane of a step has been joined.
  fn step_joined(&self) {}
}

/// Summary of a scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutcome {
  pub succeeded: usize,
  pub failed: usize,
  /// Nodes never started because the run was aborting.
  pub skipped: usize,
  /// Panics caught while running nodes.
  pub faults: Vec<String>,
  /// Whether abort was requested at any point.
  pub aborted: bool,
}

impl PlanOutcome {
  /// Every node ran and succeeded.
  pub fn is_success(&self) -> bool {
    !self.aborted && self.failed == 0 && self.skipped == 0 && self.faults.is_empty()
  }

  fn merge(&mut self, lane: LaneOutcome) {
    self.succeeded += lane.succeeded;
    self.failed += lane.failed;
    self.skipped += lane.skipped;
  }
}

#[derive(Debug, Default)]
struct LaneOutcome {
  succeeded: usize,
  failed: usize,
  skipped: usize,
}

/// Run every step of `plan` against `nodes`.
pub async fn run_plan<E: NodeExecutor>(plan: &ExecutionPlan, nodes: &[Arc<BuildNode>], executor: Arc<E>) -> PlanOutcome {
  let mut outcome = PlanOutcome::default();

  for (position, step) in plan.steps().iter().enumerate() {
    if executor.is_aborted() {
      let remaining: usize = plan.steps()[position..].iter().map(step_size).sum();
      warn!(remaining, "run aborted, skipping remaining steps");
      outcome.skipped += remaining;
      break;
    }

    let lanes = match step {
      Step::Node(index) => {
        debug!(step = position, node = %nodes[*index].name, "running sequential step");
        vec![Lane::Single(*index)]
      }
      Step::Batch(lanes) => {
        debug!(step = position, lanes = lanes.len(), "running parallel batch");
        lanes.clone()
      }
    };

    let mut join_set = JoinSet::new();
    for lane in lanes {
      let members: Vec<(usize, Arc<BuildNode>)> = lane
        .members()
        .iter()
        .map(|&index| (index, nodes[index].clone()))
        .collect();
      join_set.spawn(run_lane(members, executor.clone()));
    }

    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok(lane) => outcome.merge(lane),
        Err(e) => {
          let fault = describe_fault(e);
          warn!(fault = %fault, "node task faulted");
          executor.request_abort();
          outcome.faults.push(fault);
        }
      }
    }
    executor.step_joined();
  }

  outcome.aborted = executor.is_aborted();
  outcome
}

async fn run_lane<E: NodeExecutor>(members: Vec<(usize, Arc<BuildNode>)>, executor: Arc<E>) -> LaneOutcome {
  let mut outcome = LaneOutcome::default();
  let mut members = members.into_iter();

  for (index, node) in members.by_ref() {
    if executor.is_aborted() {
      debug!(node = %node.name, "not starting node, run is aborting");
      outcome.skipped += 1;
      break;
    }
    if executor.execute_node(index, node.clone()).await {
      outcome.succeeded += 1;
    } else {
      debug!(node = %node.name, "node failed, requesting abort");
      outcome.failed += 1;
      executor.request_abort();
    }
  }

  outcome.skipped += members.count();
  outcome
}

fn step_size(step: &Step) -> usize {
  match step {
    Step::Node(_) => 1,
    Step::Batch(lanes) => lanes.iter().map(|lane| lane.members().len()).sum(),
  }
}

fn describe_fault(error: JoinError) -> String {
  if error.is_panic() {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
      return format!("task panicked: {message}");
    }
    if let Some(message) = payload.downcast_ref::<String>() {
      return format!("task panicked: {message}");
    }
    return "task panicked".to_string();
  }
  format!("task failed: {error}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::{BTreeMap, HashSet};
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::time::Duration;

  fn node(name: &str, is_parallel: bool, parallel_queue: u32) -> Arc<BuildNode> {
    Arc::new(BuildNode {
      name: name.to_string(),
      command: "test".to_string(),
      args: BTreeMap::new(),
      is_parallel,
      parallel_queue,
    })
  }

  /// Records start/end events; nodes named in `fail` report failure and
  /// nodes named in `panic` panic. Every node sleeps `delay`.
  #[derive(Default)]
  struct Recorder {
    events: Mutex<Vec<String>>,
    fail: HashSet<String>,
    panic: HashSet<String>,
    delays: BTreeMap<String, u64>,
    aborted: AtomicBool,
    running: AtomicUsize,
    max_running: AtomicUsize,
    /// Number of events recorded when each step was joined.
    joins: Mutex<Vec<usize>>,
  }

  impl Recorder {
    fn failing(names: &[&str]) -> Self {
      Self {
        fail: names.iter().map(|s| s.to_string()).collect(),
        ..Self::default()
      }
    }

    fn events(&self) -> Vec<String> {
      self.events.lock().unwrap().clone()
    }

    fn position(&self, event: &str) -> usize {
      self
        .events()
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("missing event {event}"))
    }
  }

  #[async_trait]
  impl NodeExecutor for Recorder {
    async fn execute_node(&self, _index: usize, node: Arc<BuildNode>) -> bool {
      self.events.lock().unwrap().push(format!("start:{}", node.name));
      let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_running.fetch_max(now, Ordering::SeqCst);

      let delay = self.delays.get(&node.name).copied().unwrap_or(20);
      tokio::time::sleep(Duration::from_millis(delay)).await;

      self.running.fetch_sub(1, Ordering::SeqCst);
      if self.panic.contains(&node.name) {
        panic!("boom in {}", node.name);
      }
      self.events.lock().unwrap().push(format!("end:{}", node.name));
      !self.fail.contains(&node.name)
    }

    fn is_aborted(&self) -> bool {
      self.aborted.load(Ordering::SeqCst)
    }

    fn request_abort(&self) {
      self.aborted.store(true, Ordering::SeqCst);
    }

    fn step_joined(&self) {
      let seen = self.events.lock().unwrap().len();
      self.joins.lock().unwrap().push(seen);
    }
  }

  async fn run(nodes: Vec<Arc<BuildNode>>, recorder: Recorder) -> (PlanOutcome, Arc<Recorder>) {
    let recorder = Arc::new(recorder);
    let plan = ExecutionPlan::from_nodes(&nodes);
    let outcome = run_plan(&plan, &nodes, recorder.clone()).await;
    (outcome, recorder)
  }

  // ==========================================================================
  // Ordering
  // ==========================================================================

  #[tokio::test]
  async fn sequential_nodes_run_in_order() {
    let (outcome, recorder) = run(vec![node("a", false, 0), node("b", false, 0)], Recorder::default()).await;

    assert!(outcome.is_success());
    assert_eq!(recorder.events(), vec!["start:a", "end:a", "start:b", "end:b"]);
  }

  #[tokio::test]
  async fn queue_members_ordered_and_batch_concurrent() {
    let recorder = Recorder {
      delays: [("b".to_string(), 200)].into(),
      ..Recorder::default()
    };
    let (outcome, recorder) = run(
      vec![node("a", false, 0), node("b", true, 0), node("c", true, 1), node("d", true, 1)],
      recorder,
    )
    .await;

    assert!(outcome.is_success());
    assert_eq!(outcome.succeeded, 4);

    // A completes before anything in the batch starts.
    let a_end = recorder.position("end:a");
    assert!(a_end < recorder.position("start:b"));
    assert!(a_end < recorder.position("start:c"));

    // D starts only after C completes.
    assert!(recorder.position("end:c") < recorder.position("start:d"));

    // B runs alongside the C -> D chain.
    assert!(recorder.position("start:c") < recorder.position("end:b"));
    assert!(recorder.position("start:d") < recorder.position("end:b"));
    assert!(recorder.max_running.load(Ordering::SeqCst) >= 2);
  }

  #[tokio::test]
  async fn batch_joins_before_next_step() {
    let recorder = Recorder {
      delays: [("slow".to_string(), 150)].into(),
      ..Recorder::default()
    };
    let (_, recorder) = run(
      vec![node("fast", true, 0), node("slow", true, 0), node("after", false, 0)],
      recorder,
    )
    .await;

    assert!(recorder.position("end:slow") < recorder.position("start:after"));
  }

  #[tokio::test]
  async fn step_joined_after_every_lane_ends() {
    let recorder = Recorder {
      delays: [("c".to_string(), 120)].into(),
      ..Recorder::default()
    };
    let (_, recorder) = run(
      vec![node("a", false, 0), node("b", true, 0), node("c", true, 1), node("d", true, 1), node("e", false, 0)],
      recorder,
    )
    .await;

    let joins = recorder.joins.lock().unwrap().clone();
    assert_eq!(joins.len(), 3);
    // a; then b, c, d; then e. Each join sees every event of its step.
    assert_eq!(joins, vec![2, 8, 10]);
    assert_eq!(recorder.position("start:e"), 8);
  }

  // ==========================================================================
  // Failure
  // ==========================================================================

  #[tokio::test]
  async fn sequential_failure_stops_later_steps() {
    let (outcome, recorder) = run(
      vec![node("a", false, 0), node("b", false, 0), node("c", true, 0)],
      Recorder::failing(&["a"]),
    )
    .await;

    assert!(outcome.aborted);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.skipped, 2);
    assert_eq!(recorder.events(), vec!["start:a", "end:a"]);
  }

  #[tokio::test]
  async fn batch_failure_lets_siblings_finish() {
    let recorder = Recorder {
      fail: ["bad".to_string()].into(),
      delays: [("bad".to_string(), 10), ("sibling".to_string(), 150)].into(),
      ..Recorder::default()
    };
    let (outcome, recorder) = run(
      vec![node("bad", true, 0), node("sibling", true, 0), node("later", false, 0)],
      recorder,
    )
    .await;

    assert!(outcome.aborted);
    assert!(recorder.events().contains(&"end:sibling".to_string()));
    assert!(!recorder.events().contains(&"start:later".to_string()));
    assert_eq!(outcome.succeeded, 1);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.skipped, 1);
  }

  #[tokio::test]
  async fn queue_stops_at_its_own_failure() {
    let (outcome, recorder) = run(
      vec![node("q1", true, 1), node("q2", true, 1), node("q3", true, 1)],
      Recorder::failing(&["q1"]),
    )
    .await;

    assert!(outcome.aborted);
    assert_eq!(outcome.skipped, 2);
    assert!(!recorder.events().iter().any(|e| e == "start:q2"));
  }

  #[tokio::test]
  async fn queue_does_not_continue_after_sibling_failure() {
    let recorder = Recorder {
      fail: ["bad".to_string()].into(),
      delays: [("bad".to_string(), 10), ("q1".to_string(), 150)].into(),
      ..Recorder::default()
    };
    let (outcome, recorder) = run(
      vec![node("bad", true, 0), node("q1", true, 1), node("q2", true, 1)],
      recorder,
    )
    .await;

    assert!(outcome.aborted);
    assert!(recorder.events().contains(&"end:q1".to_string()));
    assert!(!recorder.events().contains(&"start:q2".to_string()));
  }

  #[tokio::test]
  async fn panic_is_recorded_as_fault() {
    let recorder = Recorder {
      panic: ["explode".to_string()].into(),
      ..Recorder::default()
    };
    let (outcome, recorder) = run(vec![node("explode", false, 0), node("next", false, 0)], recorder).await;

    assert!(outcome.aborted);
    assert_eq!(outcome.faults.len(), 1);
    assert!(outcome.faults[0].contains("boom in explode"));
    assert!(!recorder.events().contains(&"start:next".to_string()));
  }

  #[tokio::test]
  async fn pre_aborted_run_starts_nothing() {
    let recorder = Recorder::default();
    recorder.request_abort();
    let (outcome, recorder) = run(vec![node("a", false, 0), node("b", true, 0)], recorder).await;

    assert!(recorder.events().is_empty());
    assert_eq!(outcome.skipped, 2);
  }

  #[tokio::test]
  async fn every_node_runs_once() {
    let nodes: Vec<_> = (0..12)
      .map(|i| node(&format!("n{i}"), i % 3 != 0, (i % 4) as u32))
      .collect();
    let (outcome, recorder) = run(nodes, Recorder::default()).await;

    assert_eq!(outcome.succeeded, 12);
    let starts: Vec<_> = recorder.events().into_iter().filter(|e| e.starts_with("start:")).collect();
    let unique: HashSet<_> = starts.iter().collect();
    assert_eq!(starts.len(), 12);
    assert_eq!(unique.len(), 12);
  }
}
