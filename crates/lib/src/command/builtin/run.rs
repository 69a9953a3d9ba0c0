//! External process execution with output capture.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::process::Command as Process;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandArgs, CommandResult, required_arg};

/// Runs the executable at `path`.
///
/// Arguments:
/// - `args`: whitespace-separated process arguments, double quotes group
/// - `work_dir`: working directory (defaults to the server's)
/// - `log_file`: write captured output there instead of returning it
/// - `error_filter`: `;`-separated fragments; any match in the output fails the node
///
/// stdout and stderr are captured. The message is the trimmed output, or
/// `Log saved to <file>.` when `log_file` is set. A non-zero exit status
/// fails the node.
///
/// `cancel` kills the child process.
pub struct RunCommand {
  cancelled: AtomicBool,
  cancel_signal: Notify,
}

impl RunCommand {
  pub fn new() -> Self {
    Self {
      cancelled: AtomicBool::new(false),
      cancel_signal: Notify::new(),
    }
  }

  async fn run(&self, path: &str, args: &CommandArgs) -> Result<CommandResult, String> {
    let process_args = args.get("args").map(|raw| split_args(raw)).unwrap_or_default();
    let work_dir = required_arg(args, "work_dir");
    let log_file = required_arg(args, "log_file");
    let error_filter = required_arg(args, "error_filter");

    info!(path = %path, args = ?process_args, "running process");

    let mut process = Process::new(path);
    process
      .args(&process_args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    if let Some(dir) = work_dir {
      process.current_dir(Path::new(dir));
    }

    if self.cancelled.load(Ordering::SeqCst) {
      return Ok(CommandResult::fail(format!("Process \"{path}\" cancelled before start")));
    }

    let child = process
      .spawn()
      .map_err(|e| format!("Failed to run process at \"{path}\": \"{e}\""))?;

    // Dropping the child on cancel kills it (kill_on_drop).
    let output = tokio::select! {
      output = child.wait_with_output() => output.map_err(|e| format!("Failed to wait for process \"{path}\": \"{e}\""))?,
      _ = self.cancel_signal.notified() => {
        warn!(path = %path, "process cancelled");
        return Ok(CommandResult::fail(format!("Process \"{path}\" cancelled")));
      }
    };

    let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
    captured.push_str(&String::from_utf8_lossy(&output.stderr));
    let captured = captured.trim_end().to_string();

    let message = match log_file {
      Some(log_file) => {
        tokio::fs::write(log_file, format!("{captured}\n"))
          .await
          .map_err(|e| format!("Failed to write log file \"{log_file}\": \"{e}\""))?;
        format!("Log saved to {log_file}.")
      }
      None => captured.clone(),
    };

    if let Some(fragment) = error_filter.and_then(|filter| find_error(filter, &captured)) {
      debug!(path = %path, fragment = %fragment, "error filter matched");
      return Ok(CommandResult::fail(message));
    }

    if !output.status.success() {
      debug!(path = %path, code = ?output.status.code(), "process exited with failure");
      let detail = match output.status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
      };
      return Ok(CommandResult::fail(format!("{message}\nProcess \"{path}\" failed: {detail}")));
    }

    Ok(CommandResult::success(message).with_result(captured))
  }
}

impl Default for RunCommand {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl Command for RunCommand {
  async fn execute(&self, args: &CommandArgs) -> CommandResult {
    let Some(path) = required_arg(args, "path") else {
      return CommandResult::fail("No path provided!");
    };
    self.run(path, args).await.unwrap_or_else(CommandResult::fail)
  }

  fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
    // notify_one stores a permit, so a cancel that lands before the select still wins.
    self.cancel_signal.notify_one();
  }
}

/// Find the first `;`-separated fragment of `filter` contained in `output`.
fn find_error<'a>(filter: &'a str, output: &str) -> Option<&'a str> {
  filter
    .split(';')
    .filter(|fragment| !fragment.is_empty())
    .find(|fragment| output.contains(fragment))
}

/// Split a command line into arguments on whitespace. Double quotes group
/// words and are removed.
pub fn split_args(raw: &str) -> Vec<String> {
  let mut args = Vec::new();
  let mut current = String::new();
  let mut in_quotes = false;
  let mut has_token = false;

  for ch in raw.chars() {
    match ch {
      '"' => {
        in_quotes = !in_quotes;
        has_token = true;
      }
      c if c.is_whitespace() && !in_quotes => {
        if has_token {
          args.push(std::mem::take(&mut current));
          has_token = false;
        }
      }
      c => {
        current.push(c);
        has_token = true;
      }
    }
  }
  if has_token {
    args.push(current);
  }

  args
}
