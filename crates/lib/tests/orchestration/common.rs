//! Shared helpers for orchestration tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskforge_lib::command::{Command, CommandArgs, CommandRegistry, CommandResult};
use taskforge_lib::events::{RequestContext, ServerEvent};
use taskforge_lib::project::Project;
use taskforge_lib::server::BuildServer;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Shared start/end log written by [`TraceCommand`].
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Test command: logs `start:<id>` and `end:<id>`, sleeps `sleep_ms`, fails
/// when `fail` is `true`, and returns `id` as its result.
pub struct TraceCommand {
  log: EventLog,
}

#[async_trait]
impl Command for TraceCommand {
  async fn execute(&self, args: &CommandArgs) -> CommandResult {
    let id = args.get("id").cloned().unwrap_or_default();
    self.log.lock().unwrap().push(format!("start:{id}"));

    let sleep_ms = args.get("sleep_ms").and_then(|v| v.parse().ok()).unwrap_or(20);
    tokio::time::sleep(Duration::from_millis(sleep_ms)).await;

    self.log.lock().unwrap().push(format!("end:{id}"));
    if args.get("fail").map(String::as_str) == Some("true") {
      CommandResult::fail(format!("{id} failed"))
    } else {
      CommandResult::success(format!("{id} done")).with_result(id)
    }
  }
}

/// An isolated project with build definitions written to a temp directory.
pub struct TestEnv {
  pub temp: TempDir,
  pub server: BuildServer,
  pub log: EventLog,
}

impl TestEnv {
  pub fn new(keys: &[(&str, &str)], builds: &[(&str, &str)]) -> Self {
    let temp = TempDir::new().unwrap();
    let builds_dir = temp.path().join("builds");
    std::fs::create_dir(&builds_dir).unwrap();
    for (name, json) in builds {
      std::fs::write(builds_dir.join(format!("{name}.json")), json).unwrap();
    }

    let log: EventLog = Arc::default();
    let trace_log = log.clone();
    let registry = CommandRegistry::builtin().with_command("trace", move || {
      Arc::new(TraceCommand {
        log: trace_log.clone(),
      })
    });

    let keys: BTreeMap<String, String> = keys.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    let server = BuildServer::new("test", Project::new(keys, builds_dir), registry);

    Self { temp, server, log }
  }

  /// Subscribe, then load the catalog so load errors are observable.
  pub fn load(&self) -> broadcast::Receiver<ServerEvent> {
    let events = self.server.subscribe();
    self.server.load_builds().unwrap();
    events
  }

  pub fn log(&self) -> Vec<String> {
    self.log.lock().unwrap().clone()
  }

  pub fn position(&self, entry: &str) -> usize {
    self
      .log()
      .iter()
      .position(|e| e == entry)
      .unwrap_or_else(|| panic!("{entry} not in {:?}", self.log()))
  }
}

pub fn ctx() -> RequestContext {
  RequestContext::new("test")
}

pub fn args(values: &[&str]) -> Vec<String> {
  values.iter().map(|s| s.to_string()).collect()
}

/// Drain everything published so far.
pub fn drain(events: &mut broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
  let mut drained = Vec::new();
  while let Ok(event) = events.try_recv() {
    drained.push(event);
  }
  drained
}
