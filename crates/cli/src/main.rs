mod cmd;
mod output;
mod view;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taskforge_lib::config::ServerConfig;

use crate::output::OutputFormat;

/// forge - run declarative builds, one at a time, on request
#[derive(Parser)]
#[command(name = "forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Project file, repeat to merge several (default: $TASKFORGE_PROJECT or taskforge.json)
  #[arg(short, long = "project", global = true)]
  project: Vec<PathBuf>,

  /// Statistics file (default: $TASKFORGE_STATS or <data dir>/stats.json)
  #[arg(long, global = true)]
  stats: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Serve requests read line by line from stdin
  Serve {
    /// Name the server reports in help output
    #[arg(long, default_value = "forge")]
    name: String,
  },

  /// Run one build and exit
  Run {
    /// Build to run
    build: String,

    /// Positional build arguments
    args: Vec<String>,

    /// Abort the build after this long (e.g. "90s", "10m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,
  },

  /// List the builds of the project
  List {
    /// Output format
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let config = ServerConfig::resolve(cli.project, cli.stats);

  match cli.command {
    Commands::Serve { name } => cmd::cmd_serve(config.with_name(name)),
    Commands::Run { build, args, timeout } => cmd::cmd_run(&config, &build, &args, timeout),
    Commands::List { format } => cmd::cmd_list(&config, format),
  }
}
