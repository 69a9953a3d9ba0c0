//! Implementation of the `forge serve` command.
//!
//! Reads one request per line from stdin (`help`, `status`, `build <name>
//! <arg>*`, `stats [name]`, `stop`) until `stop` or end of input, rendering
//! server events to the terminal as they arrive.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use taskforge_lib::config::ServerConfig;
use taskforge_lib::controller::{Controller, Dispatch};
use taskforge_lib::events::RequestContext;
use taskforge_lib::stats::StatsRecorder;

use super::open_server;
use crate::view;

pub fn cmd_serve(config: ServerConfig) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> Result<()> {
  let server = open_server(&config)?;

  let recorder = Arc::new(StatsRecorder::load(&config.stats_file));
  let stats = recorder.attach(&server);

  let handler_recorder = recorder.clone();
  let controller = Arc::new(
    Controller::new(server.clone(), RequestContext::new("stdin")).with_handler(
      "stats",
      "[build]  show run statistics",
      move |server, context, args| handler_recorder.handle_request(server, context, args),
    ),
  );
  let rendering = view::spawn(server.subscribe(), Some(controller.clone()));

  if let Err(e) = server.load_builds() {
    server.stop().await;
    let _ = rendering.await;
    let _ = stats.await;
    return Err(e).context("Failed to load builds");
  }
  info!(name = %server.name(), builds = server.catalog().len(), "serving requests from stdin");

  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    let line = match lines.next_line().await.context("Failed to read request")? {
      Some(line) => line,
      None => {
        debug!("end of input");
        "stop".to_string()
      }
    };

    match controller.dispatch(&line).await {
      Dispatch::Stopped => break,
      // The run reports through events; its handle is not needed here.
      Dispatch::Started(_) | Dispatch::Handled => {}
    }
  }

  let _ = rendering.await;
  let _ = stats.await;
  Ok(())
}
