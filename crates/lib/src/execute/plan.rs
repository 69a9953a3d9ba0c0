//! Turning a node list into sequential steps and parallel batches.

use std::borrow::Borrow;
use std::collections::BTreeMap;

use crate::build::BuildNode;

/// One blocking unit of the scheduler's spine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
  /// A sequential node, by index into the build's node list.
  Node(usize),
  /// Consecutive parallel nodes, joined as a whole before the next step.
  Batch(Vec<Lane>),
}

/// A concurrently running part of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lane {
  /// A queue-0 node, unordered relative to everything else in the batch.
  Single(usize),
  /// Nodes sharing a queue id, run one after another in list order.
  Queue { id: u32, members: Vec<usize> },
}

impl Lane {
  pub fn members(&self) -> &[usize] {
    match self {
      Lane::Single(index) => std::slice::from_ref(index),
      Lane::Queue { members, .. } => members,
    }
  }
}

/// The ordered steps of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
  steps: Vec<Step>,
}

impl ExecutionPlan {
  /// Group `nodes` into steps.
  ///
  /// Consecutive parallel nodes accumulate into one batch; a sequential node
  /// flushes the pending batch and then becomes its own step.
  pub fn from_nodes<N: Borrow<BuildNode>>(nodes: &[N]) -> Self {
    let mut steps = Vec::new();
    let mut pending: Vec<usize> = Vec::new();

    for (index, node) in nodes.iter().enumerate() {
      if node.borrow().is_parallel {
        pending.push(index);
      } else {
        flush(&mut pending, nodes, &mut steps);
        steps.push(Step::Node(index));
      }
    }
    flush(&mut pending, nodes, &mut steps);

    Self { steps }
  }

  pub fn steps(&self) -> &[Step] {
    &self.steps
  }

  /// Number of nodes the plan covers.
  pub fn node_count(&self) -> usize {
    self
      .steps
      .iter()
      .map(|step| match step {
        Step::Node(_) => 1,
        Step::Batch(lanes) => lanes.iter().map(|lane| lane.members().len()).sum(),
      })
      .sum()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}

fn flush<N: Borrow<BuildNode>>(pending: &mut Vec<usize>, nodes: &[N], steps: &mut Vec<Step>) {
  if pending.is_empty() {
    return;
  }

  let mut lanes = Vec::new();
  let mut queues: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
  for index in pending.drain(..) {
    match nodes[index].borrow().parallel_queue {
      0 => lanes.push(Lane::Single(index)),
      id => queues.entry(id).or_default().push(index),
    }
  }
  lanes.extend(queues.into_iter().map(|(id, members)| Lane::Queue { id, members }));

  steps.push(Step::Batch(lanes));
}
