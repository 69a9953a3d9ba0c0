//! Build definition and resolved build types.
//!
//! Two shapes exist for every build:
//!
//! - [`BuildDefinition`]: what a definition file says, after parsing. Its
//!   nodes are [`DefNode`]s and may reference other builds.
//! - [`Build`]: the resolved, immutable form the orchestrator runs. It holds
//!   only [`BuildNode`]s, so a sub-build reference can never reach the
//!   scheduler.
//!
//! # Definition format
//!
//! ```json
//! {
//!   "args": ["env"],
//!   "argChecks": ["^(prod|dev)$"],
//!   "logFile": "{logs}/deploy-{env}.log",
//!   "nodes": [
//!     { "name": "guard", "command": "check", "args": { "condition": "{env}", "value": "prod" } },
//!     { "name": "prepare", "subBuild": "prepare", "subBuildArgs": { "target": "{env}" } },
//!     { "name": "a", "command": "run", "args": { "path": "make" }, "isParallel": true, "parallelQueue": 1 }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One node as written in a definition file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeDef {
  pub name: String,
  pub command: Option<String>,
  pub args: BTreeMap<String, String>,
  pub is_parallel: bool,
  /// Any id <= 0 means unordered.
  pub parallel_queue: i64,
  pub sub_build: Option<String>,
  pub sub_build_args: BTreeMap<String, String>,
}

/// A build definition file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildDef {
  pub args: Vec<String>,
  pub arg_checks: Vec<Option<String>>,
  pub log_file: Option<String>,
  pub nodes: Vec<NodeDef>,
}

/// A runnable task: one command invocation with argument templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildNode {
  /// Unique within its definition; namespaces the node's task state.
  pub name: String,
  pub command: String,
  /// Argument name → template.
  pub args: BTreeMap<String, String>,
  pub is_parallel: bool,
  /// 0 runs unordered within a batch; nodes sharing an id > 0 run in list order.
  pub parallel_queue: u32,
}

/// Reference to another build, replaced by that build's nodes during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBuildNode {
  pub name: String,
  pub build: String,
  /// Call-site values for `{key}` tokens in the inlined nodes.
  pub overrides: BTreeMap<String, String>,
}

/// A parsed, not yet resolved node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefNode {
  Task(BuildNode),
  SubBuild(SubBuildNode),
}

impl DefNode {
  pub fn name(&self) -> &str {
    match self {
      DefNode::Task(node) => &node.name,
      DefNode::SubBuild(node) => &node.name,
    }
  }
}

/// A parsed definition awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDefinition {
  pub name: String,
  pub args: Vec<String>,
  pub arg_checks: Vec<Option<String>>,
  pub log_file: Option<String>,
  pub nodes: Vec<DefNode>,
}

impl BuildDefinition {
  /// Names of the builds this definition references, in node order.
  pub fn sub_builds(&self) -> impl Iterator<Item = &str> {
    self.nodes.iter().filter_map(|node| match node {
      DefNode::SubBuild(sub) => Some(sub.build.as_str()),
      DefNode::Task(_) => None,
    })
  }
}

/// A resolved build. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
  pub name: String,
  /// Declared positional argument names.
  pub args: Vec<String>,
  /// Validation pattern per argument index.
  pub arg_checks: Vec<Option<String>>,
  pub log_file: Option<String>,
  pub nodes: Vec<Arc<BuildNode>>,
}

impl Build {
  /// Validation pattern for argument `index`. Empty patterns count as absent.
  pub fn arg_check(&self, index: usize) -> Option<&str> {
    self
      .arg_checks
      .get(index)
      .and_then(|check| check.as_deref())
      .filter(|pattern| !pattern.trim().is_empty())
  }

  /// Pair declared argument names with positional values.
  ///
  /// Extra values beyond the declared names are dropped.
  pub fn bind_args(&self, values: &[String]) -> Vec<(String, String)> {
    self.args.iter().cloned().zip(values.iter().cloned()).collect()
  }
}
