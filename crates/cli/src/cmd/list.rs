//! Implementation of the `forge list` command.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use taskforge_lib::build::BuildCatalog;
use taskforge_lib::command::CommandRegistry;
use taskforge_lib::config::ServerConfig;
use taskforge_lib::project::Project;

use crate::output::{OutputFormat, print_error, print_info, print_json, print_stat, print_success, symbols};

/// Print the builds that load, with their arguments, then the ones that don't.
pub fn cmd_list(config: &ServerConfig, format: OutputFormat) -> Result<()> {
  let project = Project::load(&config.project_files).context("Failed to load project")?;
  let catalog = BuildCatalog::load(project.builds_root(), &CommandRegistry::builtin())
    .with_context(|| format!("Failed to load builds from {}", project.builds_root().display()))?;

  if format.is_json() {
    let builds: Vec<_> = catalog
      .builds()
      .map(|build| {
        serde_json::json!({
          "name": build.name,
          "args": build.args,
          "nodes": build.nodes.len(),
          "logFile": build.log_file,
        })
      })
      .collect();
    let failures: Vec<_> = catalog
      .failures()
      .iter()
      .map(|(name, e)| serde_json::json!({ "name": name, "error": e.to_string() }))
      .collect();
    return print_json(&serde_json::json!({ "builds": builds, "failures": failures }));
  }

  if catalog.is_empty() {
    print_info(&format!("No builds found in {}", project.builds_root().display()));
  } else {
    print_success(&format!(
      "{} build(s) in {}",
      catalog.len(),
      project.builds_root().display()
    ));
    for build in catalog.builds() {
      let args: Vec<String> = build.args.iter().map(|arg| format!("<{arg}>")).collect();
      println!(
        "  {} {} {}",
        symbols::INFO,
        build.name,
        args.join(" ").if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
      if let Some(log_file) = &build.log_file {
        print_stat("    log", log_file);
      }
    }
  }

  for (name, e) in catalog.failures() {
    print_error(&format!("{name}: {e}"));
  }

  Ok(())
}
