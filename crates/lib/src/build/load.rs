//! Reading build definition files from the builds directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::error::BuildError;
use super::types::{BuildDef, BuildDefinition, BuildNode, DefNode, NodeDef, SubBuildNode};
use crate::consts::BUILD_FILE_EXTENSION;

/// List the definition files directly inside `dir` as `(build name, path)`,
/// sorted by name. The build name is the file stem.
pub fn discover(dir: &Path) -> Result<Vec<(String, PathBuf)>, BuildError> {
  if !dir.is_dir() {
    return Err(BuildError::MissingBuildsDir { path: dir.to_path_buf() });
  }

  let mut found = Vec::new();
  for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
    let entry = entry.map_err(|e| BuildError::Read {
      path: e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf()),
      source: e
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
    })?;
    let path = entry.path();
    if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some(BUILD_FILE_EXTENSION) {
      continue;
    }
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
      found.push((stem.to_string(), path.to_path_buf()));
    }
  }

  found.sort();
  debug!(dir = %dir.display(), count = found.len(), "discovered build definitions");
  Ok(found)
}

/// Read and parse the definition at `path`.
pub fn load_definition(name: &str, path: &Path) -> Result<BuildDefinition, BuildError> {
  let content = std::fs::read_to_string(path).map_err(|source| BuildError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let def: BuildDef = serde_json::from_str(&content).map_err(|source| BuildError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  convert_definition(name, def)
}

/// Parse a definition from JSON text. Used where no file backs the build.
pub fn parse_definition(name: &str, content: &str) -> Result<BuildDefinition, BuildError> {
  let def: BuildDef = serde_json::from_str(content).map_err(|source| BuildError::Parse {
    path: PathBuf::from(format!("{name}.{BUILD_FILE_EXTENSION}")),
    source,
  })?;
  convert_definition(name, def)
}

/// Turn the raw file shape into a definition, checking its structure.
pub fn convert_definition(name: &str, def: BuildDef) -> Result<BuildDefinition, BuildError> {
  if def.arg_checks.len() > def.args.len() {
    return Err(BuildError::Config {
      build: name.to_string(),
      message: format!("{} argChecks for {} args", def.arg_checks.len(), def.args.len()),
    });
  }

  let mut seen = HashSet::new();
  let mut nodes = Vec::with_capacity(def.nodes.len());
  for node in def.nodes {
    let node = convert_node(name, node)?;
    if !seen.insert(node.name().to_string()) {
      return Err(BuildError::DuplicateNode {
        build: name.to_string(),
        node: node.name().to_string(),
      });
    }
    nodes.push(node);
  }

  Ok(BuildDefinition {
    name: name.to_string(),
    args: def.args,
    arg_checks: def.arg_checks,
    log_file: def.log_file.filter(|file| !file.is_empty()),
    nodes,
  })
}

fn convert_node(build: &str, node: NodeDef) -> Result<DefNode, BuildError> {
  if let Some(sub_build) = node.sub_build.filter(|s| !s.is_empty()) {
    let overrides = if node.sub_build_args.is_empty() {
      node.args
    } else {
      node.sub_build_args
    };
    let name = if node.name.is_empty() { sub_build.clone() } else { node.name };
    return Ok(DefNode::SubBuild(SubBuildNode {
      name,
      build: sub_build,
      overrides,
    }));
  }

  if node.name.is_empty() {
    return Err(BuildError::Config {
      build: build.to_string(),
      message: "node without a name".to_string(),
    });
  }

  // A missing command is reported against the registry during resolution.
  Ok(DefNode::Task(BuildNode {
    name: node.name,
    command: node.command.unwrap_or_default(),
    args: node.args,
    is_parallel: node.is_parallel,
    parallel_queue: queue_id(node.parallel_queue),
  }))
}

fn queue_id(raw: i64) -> u32 {
  if raw <= 0 { 0 } else { u32::try_from(raw).unwrap_or(u32::MAX) }
}
