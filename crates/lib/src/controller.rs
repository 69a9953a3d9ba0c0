//! Text requests: `<verb> <arg>*`.
//!
//! Built-in verbs:
//!
//! | verb                  | effect                                        |
//! |-----------------------|-----------------------------------------------|
//! | `help`                | publish `HelpRequested`                       |
//! | `status`              | publish `StatusRequested`                     |
//! | `build <name> <arg>*` | initialize and start the build                |
//! | `stop`                | abort, wait for teardown, publish `Stopped`   |
//!
//! More verbs can be added with [`Controller::with_handler`]. Empty and
//! unknown verbs are treated as `help`. Rejected requests are reported
//! through `CommonError` events, never returned.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::RequestContext;
use crate::server::{BuildServer, RunState};

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub verb: String,
  pub args: Vec<String>,
}

impl Request {
  pub fn parse(line: &str) -> Self {
    let mut parts = line.split_whitespace().map(str::to_string);
    Self {
      verb: parts.next().unwrap_or_default(),
      args: parts.collect(),
    }
  }
}

/// Handler for an additional verb.
pub type RequestHandler = Arc<dyn Fn(&BuildServer, &RequestContext, &[String]) + Send + Sync>;

/// What a dispatched request led to.
#[derive(Debug)]
pub enum Dispatch {
  Handled,
  /// A build was started; the handle resolves when it is torn down.
  Started(JoinHandle<RunState>),
  /// The server stopped. Front ends should exit.
  Stopped,
}

/// Routes request lines to the server.
pub struct Controller {
  server: BuildServer,
  context: RequestContext,
  handlers: BTreeMap<String, (String, RequestHandler)>,
}

const BUILTIN_VERBS: [(&str, &str); 4] = [
  ("help", "show this help"),
  ("status", "show the active build"),
  ("build", "<name> <arg>*  run a build"),
  ("stop", "abort the active build and stop the server"),
];

impl Controller {
  pub fn new(server: BuildServer, context: RequestContext) -> Self {
    Self {
      server,
      context,
      handlers: BTreeMap::new(),
    }
  }

  /// Register an extra verb. Built-in verbs cannot be replaced.
  pub fn with_handler<F>(mut self, verb: &str, usage: &str, handler: F) -> Self
  where
    F: Fn(&BuildServer, &RequestContext, &[String]) + Send + Sync + 'static,
  {
    if BUILTIN_VERBS.iter().all(|(builtin, _)| *builtin != verb) {
      self
        .handlers
        .insert(verb.to_string(), (usage.to_string(), Arc::new(handler)));
    }
    self
  }

  pub fn context(&self) -> &RequestContext {
    &self.context
  }

  pub fn server(&self) -> &BuildServer {
    &self.server
  }

  pub async fn dispatch(&self, line: &str) -> Dispatch {
    self.call(Request::parse(line)).await
  }

  pub async fn call(&self, request: Request) -> Dispatch {
    debug!(origin = %self.context.origin, verb = %request.verb, args = ?request.args, "request");
    match request.verb.as_str() {
      "status" => {
        self.server.request_status(self.context.clone());
        Dispatch::Handled
      }
      "build" => self.start_build(&request.args),
      "stop" => {
        self.server.stop().await;
        Dispatch::Stopped
      }
      verb => match self.handlers.get(verb) {
        Some((_, handler)) => {
          handler(&self.server, &self.context, &request.args);
          Dispatch::Handled
        }
        None => {
          self.server.request_help(self.context.clone());
          Dispatch::Handled
        }
      },
    }
  }

  fn start_build(&self, args: &[String]) -> Dispatch {
    let Some((name, build_args)) = args.split_first() else {
      self.server.raise_common_error("build: no build name given", false);
      return Dispatch::Handled;
    };

    if let Err(e) = self.server.initialize_by_name(self.context.clone(), name, build_args) {
      self.server.raise_common_error(format!("build: {e}"), false);
      return Dispatch::Handled;
    }

    match self.server.start() {
      Ok(handle) => Dispatch::Started(handle),
      Err(e) => {
        self.server.raise_common_error(format!("build: {e}"), false);
        Dispatch::Handled
      }
    }
  }

  /// Usage text: verbs, then the runnable builds with their arguments.
  pub fn help_text(&self) -> String {
    let mut text = format!("{} commands:\n", self.server.name());
    let extra = self.handlers.iter().map(|(verb, (usage, _))| (verb.as_str(), usage.as_str()));
    for (verb, usage) in BUILTIN_VERBS.into_iter().chain(extra) {
      let _ = writeln!(text, "  {verb:<8} {usage}");
    }

    let catalog = self.server.catalog();
    if catalog.is_empty() {
      text.push_str("no builds available\n");
    } else {
      text.push_str("builds:\n");
      for build in catalog.builds() {
        let args: Vec<String> = build.args.iter().map(|arg| format!("<{arg}>")).collect();
        let _ = writeln!(text, "  {} {}", build.name, args.join(" "));
      }
    }
    text
  }
}

impl std::fmt::Debug for Controller {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Controller")
      .field("context", &self.context)
      .field("verbs", &self.handlers.keys().collect::<Vec<_>>())
      .finish()
  }
}
