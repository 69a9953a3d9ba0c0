mod list;
mod run;
mod serve;

pub use list::cmd_list;
pub use run::cmd_run;
pub use serve::cmd_serve;

use anyhow::{Context, Result};

use taskforge_lib::command::CommandRegistry;
use taskforge_lib::config::ServerConfig;
use taskforge_lib::project::Project;
use taskforge_lib::server::BuildServer;

/// Load the project and create a server with the built-in commands.
///
/// Builds are not loaded yet so the caller can subscribe first.
fn open_server(config: &ServerConfig) -> Result<BuildServer> {
  let project = Project::load(&config.project_files).context("Failed to load project")?;
  Ok(BuildServer::new(config.name.clone(), project, CommandRegistry::builtin()))
}
