//! Run statistics.
//!
//! [`StatsRecorder`] keeps a JSON file with one entry per successful run and
//! answers `stats [name]` requests with a table:
//!
//! ```text
//! Stats:
//! BUILD   COUNT  MIN    MAX    AVG    LAST
//! deploy  3      00:41  01:12  00:55  00:41
//! lint
//! ```
//!
//! The file format is private to the recorder.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{RequestContext, ServerEvent};
use crate::server::{BuildServer, ProcessSnapshot};

#[derive(Debug, Error)]
pub enum StatsError {
  #[error("failed to write stats file {}: {source}", path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize stats: {0}")]
  Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStat {
  pub name: String,
  pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStat {
  pub name: String,
  pub started_at_unix: u64,
  pub duration_secs: f64,
  pub tasks: Vec<TaskStat>,
}

impl BuildStat {
  /// Summarize a finished run. `None` if it never started.
  pub fn from_snapshot(process: &ProcessSnapshot) -> Option<Self> {
    let started_at = process.started_at?;
    Some(Self {
      name: process.name.clone(),
      started_at_unix: started_at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
      duration_secs: process.duration()?.as_secs_f64(),
      tasks: process
        .tasks
        .iter()
        .map(|task| TaskStat {
          name: task.node.clone(),
          duration_secs: task.duration().map(|d| d.as_secs_f64()).unwrap_or(0.0),
        })
        .collect(),
    })
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StatContainer {
  builds: Vec<BuildStat>,
}

/// Aggregate durations of one build, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
  pub count: usize,
  pub min: f64,
  pub max: f64,
  pub avg: f64,
  pub last: f64,
}

/// Records successful runs and renders statistics.
#[derive(Debug)]
pub struct StatsRecorder {
  path: PathBuf,
  container: Mutex<StatContainer>,
}

impl StatsRecorder {
  /// Open the stats file at `path`. Missing or unreadable files start empty.
  pub fn load(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let container = match std::fs::read_to_string(&path) {
      Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
        error!(path = %path.display(), error = %e, "can't load stats file, starting empty");
        StatContainer::default()
      }),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no stats file, starting empty");
        StatContainer::default()
      }
      Err(e) => {
        error!(path = %path.display(), error = %e, "can't read stats file, starting empty");
        StatContainer::default()
      }
    };
    debug!(path = %path.display(), builds = container.builds.len(), "stats loaded");

    Self {
      path,
      container: Mutex::new(container),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Write the stats file, creating its directory if needed.
  ///
  /// The container is serialized before the first await, so the lock is
  /// never held across file I/O.
  pub async fn save(&self) -> Result<(), StatsError> {
    let content = serde_json::to_string_pretty(&*self.container())?;
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent).await.map_err(|source| StatsError::Write {
        path: parent.to_path_buf(),
        source,
      })?;
    }
    tokio::fs::write(&self.path, content).await.map_err(|source| StatsError::Write {
      path: self.path.clone(),
      source,
    })
  }

  /// Append one run and save.
  pub async fn record(&self, process: &ProcessSnapshot) {
    let Some(stat) = BuildStat::from_snapshot(process) else {
      warn!(build = %process.name, "run has no timing, not recorded");
      return;
    };
    info!(build = %stat.name, duration_secs = stat.duration_secs, "recording build stats");
    self.container().builds.push(stat);
    if let Err(e) = self.save().await {
      error!(error = %e, "can't save stats file");
    }
  }

  /// Recorded runs of `name`, oldest first.
  pub fn runs(&self, name: &str) -> Vec<BuildStat> {
    self
      .container()
      .builds
      .iter()
      .filter(|stat| stat.name == name)
      .cloned()
      .collect()
  }

  pub fn summary(&self, name: &str) -> Option<Summary> {
    let durations: Vec<f64> = self.runs(name).iter().map(|stat| stat.duration_secs).collect();
    let last = *durations.last()?;
    let min = durations.iter().copied().fold(f64::INFINITY, f64::min);
    let max = durations.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = durations.iter().sum::<f64>() / durations.len() as f64;
    Some(Summary {
      count: durations.len(),
      min,
      max,
      avg,
      last,
    })
  }

  /// Render the table for `names`. `title` goes into the heading.
  pub fn table<S: AsRef<str>>(&self, title: Option<&str>, names: &[S]) -> String {
    let mut rows = vec![
      ["BUILD", "COUNT", "MIN", "MAX", "AVG", "LAST"]
        .map(str::to_string)
        .to_vec(),
    ];
    for name in names {
      let name = name.as_ref();
      let mut row = vec![name.to_string()];
      if let Some(summary) = self.summary(name) {
        row.push(summary.count.to_string());
        row.extend([summary.min, summary.max, summary.avg, summary.last].map(format_seconds));
      }
      rows.push(row);
    }

    let mut widths = Vec::new();
    for row in &rows {
      for (column, cell) in row.iter().enumerate() {
        if widths.len() <= column {
          widths.push(0);
        }
        widths[column] = widths[column].max(cell.len());
      }
    }

    let mut text = match title {
      Some(title) => format!("Stats ({title}):\n"),
      None => "Stats:\n".to_string(),
    };
    for row in rows {
      let cells: Vec<String> = row
        .iter()
        .enumerate()
        .map(|(column, cell)| format!("{cell:<width$}", width = widths[column]))
        .collect();
      let _ = writeln!(text, "{}", cells.join("  ").trim_end());
    }
    text
  }

  /// Answer a `stats [name]` request with a `CommonMessage`.
  pub fn handle_request(&self, server: &BuildServer, context: &RequestContext, args: &[String]) {
    let text = match args.first() {
      Some(name) => self.table(Some(name), &[name]),
      None => {
        let catalog = server.catalog();
        let names: Vec<&str> = catalog.names().collect();
        self.table(None, &names)
      }
    };
    server.raise_common_message(context.clone(), text);
  }

  /// Record every successful run published by `server` until it stops.
  pub fn attach(self: &Arc<Self>, server: &BuildServer) -> JoinHandle<()> {
    let recorder = self.clone();
    let mut events = server.subscribe();
    tokio::spawn(async move {
      loop {
        match events.recv().await {
          Ok(ServerEvent::BuildDone { process, success }) => {
            debug!(build = %process.name, success, "build done");
            if success {
              recorder.record(&process).await;
            }
          }
          Ok(ServerEvent::Stopped) | Err(RecvError::Closed) => break,
          Ok(_) => {}
          Err(RecvError::Lagged(missed)) => warn!(missed, "stats recorder lagged behind events"),
        }
      }
    })
  }

  fn container(&self) -> MutexGuard<'_, StatContainer> {
    self.container.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Format a duration as `mm:ss`, `hh:mm:ss` or `dd.hh:mm:ss`.
pub fn format_seconds(value: f64) -> String {
  let total = value.max(0.0) as u64;
  let (days, hours, minutes, seconds) = (total / 86_400, total / 3_600 % 24, total / 60 % 60, total % 60);
  if total < 3_600 {
    format!("{minutes:02}:{seconds:02}")
  } else if total < 86_400 {
    format!("{hours:02}:{minutes:02}:{seconds:02}")
  } else {
    format!("{days:02}.{hours:02}:{minutes:02}:{seconds:02}")
  }
}
