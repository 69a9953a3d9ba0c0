//! Implementation of the `forge run` command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::warn;

use taskforge_lib::config::ServerConfig;
use taskforge_lib::events::RequestContext;
use taskforge_lib::server::{BuildServer, RunState};
use taskforge_lib::stats::StatsRecorder;

use super::open_server;
use crate::view;

/// Run `build` with `args` and wait for it to finish.
///
/// Fails unless the run succeeds. With a `timeout` the run is aborted once
/// it has taken that long.
pub fn cmd_run(config: &ServerConfig, build: &str, args: &[String], timeout: Option<Duration>) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let state = rt.block_on(async {
    let server = open_server(config)?;
    let recorder = Arc::new(StatsRecorder::load(&config.stats_file));
    let stats = recorder.attach(&server);
    let rendering = view::spawn(server.subscribe(), None);

    let outcome = execute(&server, build, args, timeout).await;

    server.stop().await;
    let _ = rendering.await;
    let _ = stats.await;
    outcome
  })?;

  match state {
    RunState::Succeeded => Ok(()),
    state => bail!("Build '{}' {}", build, state),
  }
}

async fn execute(server: &BuildServer, build: &str, args: &[String], timeout: Option<Duration>) -> Result<RunState> {
  server.load_builds().context("Failed to load builds")?;
  server
    .initialize_by_name(RequestContext::new("cli"), build, args)
    .with_context(|| format!("Failed to initialize build '{}'", build))?;
  let mut handle = server.start().context("Failed to start build")?;

  let state = match timeout {
    Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
      Ok(joined) => joined?,
      Err(_) => {
        warn!(build, limit = %humantime::format_duration(limit), "timed out, aborting");
        server.abort();
        handle.await?
      }
    },
    None => handle.await?,
  };
  Ok(state)
}
