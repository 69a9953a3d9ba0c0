//! Terminal rendering of server events.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::debug;

use taskforge_lib::controller::Controller;
use taskforge_lib::events::ServerEvent;
use taskforge_lib::server::ProcessSnapshot;

use crate::output::{
  format_bound_args, format_duration, print_error, print_info, print_stat, print_step, print_success, print_warning,
};

/// Render events until the server stops. `help` answers `HelpRequested`.
pub fn spawn(mut events: broadcast::Receiver<ServerEvent>, help: Option<Arc<Controller>>) -> JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      match events.recv().await {
        Ok(ServerEvent::Stopped) => {
          print_info("Server stopped");
          break;
        }
        Ok(event) => render(&event, help.as_deref()),
        Err(RecvError::Lagged(missed)) => print_warning(&format!("{missed} event(s) not shown")),
        Err(RecvError::Closed) => break,
      }
    }
  })
}

fn render(event: &ServerEvent, help: Option<&Controller>) {
  match event {
    ServerEvent::BuildInitialized { context, process } => {
      let args = format_bound_args(&process.args);
      let mut message = format!("Build '{}' initialized by {}", process.name, context.origin);
      if !args.is_empty() {
        message.push_str(&format!(" ({args})"));
      }
      print_info(&message);
    }
    ServerEvent::TaskStarted { index, node, .. } => print_step(&format!("[{index}] {node}")),
    ServerEvent::TaskDone { index, record, .. } => {
      let took = record.duration().map(format_duration).unwrap_or_default();
      match &record.result {
        Some(result) if result.success => print_success(&format!("[{index}] {} {took}", record.node)),
        // Reported failures arrive as `CommonError`.
        Some(result) => debug!(node = %record.node, silent = result.silent, "task failed"),
        None => {}
      }
    }
    ServerEvent::BuildDone { process, success } => {
      let took = process.duration().map(format_duration).unwrap_or_default();
      if *success {
        print_success(&format!("Build '{}' succeeded in {took}", process.name));
      } else {
        print_error(&format!("Build '{}' {} after {took}", process.name, process.state));
      }
    }
    ServerEvent::StatusRequested { process, .. } => match process {
      Some(process) => render_status(process),
      None => print_info("No active build"),
    },
    ServerEvent::HelpRequested { .. } => match help {
      Some(controller) => print!("{}", controller.help_text()),
      None => debug!("help requested without a controller"),
    },
    ServerEvent::CommonError { message, is_fatal } => {
      if *is_fatal {
        print_error(&format!("fatal: {message}"));
      } else {
        print_error(message);
      }
    }
    ServerEvent::CommonMessage { message, .. } => print!("{message}"),
    ServerEvent::LogFileChanged { path: Some(path) } => print_info(&format!("Logging to {path}")),
    ServerEvent::LogFileChanged { path: None } => debug!("log file closed"),
    ServerEvent::Stopped => {}
  }
}

fn render_status(process: &ProcessSnapshot) {
  print_info(&format!("Build '{}' is {}", process.name, process.state));
  let args = format_bound_args(&process.args);
  if !args.is_empty() {
    print_stat("Args", &args);
  }
  print_stat(
    "Tasks",
    &format!("{}/{} done", process.completed_tasks(), process.node_count),
  );
  if let Some(took) = process.duration() {
    print_stat("Elapsed", &format_duration(took));
  }
}
