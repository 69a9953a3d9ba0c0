//! Sub-build inlining and command validation.
//!
//! Resolution turns every [`BuildDefinition`] into a runnable [`Build`]:
//!
//! 1. Each sub-build reference is resolved first (depth-first), then replaced
//!    in place by copies of the referenced build's nodes. The copies' argument
//!    templates have the call-site overrides substituted into their `{key}`
//!    tokens. Overrides never add argument entries.
//! 2. Node names must be unique across the flattened list, so a `{node:...}`
//!    token always refers to one node. Inlining the same sub-build twice, or
//!    a sub-build whose node names clash with the caller's, fails with
//!    [`BuildError::DuplicateNode`].
//! 3. Every node of the flattened list must name a registered command.
//!
//! A failure excludes only the build it belongs to. The current reference
//! chain is tracked so a cycle fails with [`BuildError::CyclicSubBuild`]
//! instead of recursing forever. Successful resolutions are memoized, so each
//! build is flattened at most once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::error::BuildError;
use super::load::{discover, load_definition};
use super::types::{Build, BuildDefinition, BuildNode, DefNode};
use crate::command::CommandRegistry;
use crate::placeholder::substitute;

/// The set of runnable builds, plus the builds that failed to load.
#[derive(Debug, Default)]
pub struct BuildCatalog {
  builds: BTreeMap<String, Arc<Build>>,
  failures: Vec<(String, BuildError)>,
}

impl BuildCatalog {
  /// Load and resolve every definition in `dir`.
  ///
  /// Only a missing builds directory is an error. Per-build failures are
  /// collected in [`BuildCatalog::failures`].
  pub fn load(dir: &Path, registry: &CommandRegistry) -> Result<Self, BuildError> {
    let mut definitions = Vec::new();
    let mut failures = Vec::new();

    for (name, path) in discover(dir)? {
      match load_definition(&name, &path) {
        Ok(def) => definitions.push(def),
        Err(e) => {
          error!(build = %name, error = %e, "failed to load build");
          failures.push((name, e));
        }
      }
    }

    let mut catalog = Self::resolve(definitions, registry);
    failures.append(&mut catalog.failures);
    failures.sort_by(|a, b| a.0.cmp(&b.0));
    catalog.failures = failures;

    info!(
      dir = %dir.display(),
      loaded = catalog.builds.len(),
      failed = catalog.failures.len(),
      "builds loaded"
    );
    Ok(catalog)
  }

  /// Resolve already-parsed definitions.
  pub fn resolve(definitions: Vec<BuildDefinition>, registry: &CommandRegistry) -> Self {
    let definitions: BTreeMap<String, BuildDefinition> =
      definitions.into_iter().map(|def| (def.name.clone(), def)).collect();
    let mut resolver = Resolver::new(&definitions);
    let mut catalog = Self::default();

    for (name, def) in &definitions {
      let resolved = resolver
        .resolve_nodes(name)
        .and_then(|nodes| validate_names(name, nodes))
        .and_then(|nodes| validate_commands(nodes, registry));
      match resolved {
        Ok(nodes) => {
          debug!(build = %name, nodes = nodes.len(), "build resolved");
          catalog.builds.insert(
            name.clone(),
            Arc::new(Build {
              name: name.clone(),
              args: def.args.clone(),
              arg_checks: def.arg_checks.clone(),
              log_file: def.log_file.clone(),
              nodes: nodes.into_iter().map(Arc::new).collect(),
            }),
          );
        }
        Err(e) => {
          error!(build = %name, error = %e, "failed to resolve build");
          catalog.failures.push((name.clone(), e));
        }
      }
    }

    catalog
  }

  pub fn get(&self, name: &str) -> Option<Arc<Build>> {
    self.builds.get(name).cloned()
  }

  /// Runnable build names, sorted.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.builds.keys().map(String::as_str)
  }

  pub fn builds(&self) -> impl Iterator<Item = &Arc<Build>> {
    self.builds.values()
  }

  /// Builds excluded from the catalog, with the reason.
  pub fn failures(&self) -> &[(String, BuildError)] {
    &self.failures
  }

  pub fn len(&self) -> usize {
    self.builds.len()
  }

  pub fn is_empty(&self) -> bool {
    self.builds.is_empty()
  }
}

struct Resolver<'a> {
  definitions: &'a BTreeMap<String, BuildDefinition>,
  resolved: HashMap<String, Vec<BuildNode>>,
  chain: Vec<String>,
}

impl<'a> Resolver<'a> {
  fn new(definitions: &'a BTreeMap<String, BuildDefinition>) -> Self {
    Self {
      definitions,
      resolved: HashMap::new(),
      chain: Vec::new(),
    }
  }

  fn resolve_nodes(&mut self, name: &str) -> Result<Vec<BuildNode>, BuildError> {
    if let Some(start) = self.chain.iter().position(|entry| entry == name) {
      let mut chain = self.chain[start..].to_vec();
      chain.push(name.to_string());
      return Err(BuildError::CyclicSubBuild { chain });
    }
    if let Some(nodes) = self.resolved.get(name) {
      return Ok(nodes.clone());
    }

    let definitions = self.definitions;
    let def = definitions
      .get(name)
      .ok_or_else(|| BuildError::SubBuildNotFound { name: name.to_string() })?;

    self.chain.push(name.to_string());
    let result = self.inline(def);
    self.chain.pop();

    let nodes = result?;
    self.resolved.insert(name.to_string(), nodes.clone());
    Ok(nodes)
  }

  fn inline(&mut self, def: &BuildDefinition) -> Result<Vec<BuildNode>, BuildError> {
    let mut nodes = Vec::with_capacity(def.nodes.len());
    for node in &def.nodes {
      match node {
        DefNode::Task(task) => nodes.push(task.clone()),
        DefNode::SubBuild(sub) => {
          debug!(build = %def.name, sub_build = %sub.build, "inlining sub-build");
          for inner in self.resolve_nodes(&sub.build)? {
            let args = inner
              .args
              .iter()
              .map(|(key, template)| (key.clone(), substitute(template, &[&sub.overrides])))
              .collect();
            nodes.push(BuildNode { args, ..inner });
          }
        }
      }
    }
    Ok(nodes)
  }
}

fn validate_names(build: &str, nodes: Vec<BuildNode>) -> Result<Vec<BuildNode>, BuildError> {
  let duplicate = {
    let mut seen = HashSet::with_capacity(nodes.len());
    nodes
      .iter()
      .find(|node| !seen.insert(node.name.as_str()))
      .map(|node| node.name.clone())
  };
  match duplicate {
    Some(node) => Err(BuildError::DuplicateNode {
      build: build.to_string(),
      node,
    }),
    None => Ok(nodes),
  }
}

fn validate_commands(nodes: Vec<BuildNode>, registry: &CommandRegistry) -> Result<Vec<BuildNode>, BuildError> {
  if let Some(node) = nodes.iter().find(|node| !registry.contains(&node.command)) {
    return Err(BuildError::CommandNotFound {
      node: node.name.clone(),
      command: node.command.clone(),
    });
  }
  Ok(nodes)
}
