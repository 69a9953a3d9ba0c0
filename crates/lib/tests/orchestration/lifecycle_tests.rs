//! Admission, abort, stop and collaborators observing a run.

use std::sync::Arc;
use std::time::Duration;

use taskforge_lib::controller::{Controller, Dispatch};
use taskforge_lib::events::ServerEvent;
use taskforge_lib::server::{RunState, ServerError};
use taskforge_lib::stats::StatsRecorder;

use super::common::{TestEnv, args, ctx, drain};

const DEPLOY: &str = r#"{
  "args": ["env"],
  "argChecks": ["^prod$"],
  "logFile": "{logs}/deploy-{env}.log",
  "nodes": [ { "name": "ship", "command": "trace", "args": { "id": "ship-{env}" } } ]
}"#;

const SLOW: &str = r#"{ "nodes": [ { "name": "wait", "command": "trace", "args": { "id": "wait", "sleep_ms": "300" } } ] }"#;

#[tokio::test]
async fn deploy_argument_check() {
  let env = TestEnv::new(&[("logs", "/var/log")], &[("deploy", DEPLOY)]);
  let mut events = env.load();

  let err = env.server.initialize_by_name(ctx(), "deploy", &args(&["staging"])).unwrap_err();
  assert!(matches!(
    err,
    ServerError::ArgValidation { index: 0, ref name, ref pattern, .. } if name == "env" && pattern == "^prod$"
  ));
  assert!(!env.server.is_busy());

  env.server.initialize_by_name(ctx(), "deploy", &args(&["prod"])).unwrap();
  let log_file = drain(&mut events).into_iter().find_map(|event| match event {
    ServerEvent::LogFileChanged { path } => path,
    _ => None,
  });
  assert_eq!(log_file.as_deref(), Some("/var/log/deploy-prod.log"));

  assert_eq!(env.server.start().unwrap().await.unwrap(), RunState::Succeeded);
  assert!(env.log().contains(&"start:ship-prod".to_string()));
}

#[tokio::test]
async fn too_few_arguments() {
  let env = TestEnv::new(&[], &[("deploy", DEPLOY)]);
  env.load();

  assert!(matches!(
    env.server.initialize_by_name(ctx(), "deploy", &[]),
    Err(ServerError::ArgCountMismatch { expected: 1, actual: 0 })
  ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_initialize_while_running_is_busy() {
  let env = TestEnv::new(&[], &[("slow", SLOW), ("other", SLOW)]);
  env.load();

  env.server.initialize_by_name(ctx(), "slow", &[]).unwrap();
  let handle = env.server.start().unwrap();

  let first = env.server.clone();
  let second = env.server.clone();
  let (a, b) = tokio::join!(
    tokio::spawn(async move { first.initialize_by_name(ctx(), "other", &[]) }),
    tokio::spawn(async move { second.initialize_by_name(ctx(), "other", &[]) }),
  );
  assert!(matches!(a.unwrap(), Err(ServerError::Busy { .. })));
  assert!(matches!(b.unwrap(), Err(ServerError::Busy { .. })));

  assert_eq!(handle.await.unwrap(), RunState::Succeeded);
  env.server.initialize_by_name(ctx(), "other", &[]).unwrap();
}

#[tokio::test]
async fn stop_waits_for_active_run() {
  let env = TestEnv::new(&[], &[("slow", SLOW)]);
  let mut events = env.load();

  env.server.initialize_by_name(ctx(), "slow", &[]).unwrap();
  env.server.start().unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;

  tokio::time::timeout(Duration::from_secs(5), env.server.stop())
    .await
    .expect("stop finishes");
  assert!(!env.server.is_busy());

  // The trace command has no cancel hook, so it ran to completion.
  assert!(env.log().contains(&"end:wait".to_string()));

  let order: Vec<&str> = drain(&mut events)
    .iter()
    .filter_map(|event| match event {
      ServerEvent::BuildDone { .. } => Some("done"),
      ServerEvent::LogFileChanged { path: None } => Some("log-closed"),
      ServerEvent::Stopped => Some("stopped"),
      _ => None,
    })
    .collect();
  assert_eq!(order, vec!["done", "log-closed", "stopped"]);
}

#[tokio::test]
async fn stats_record_successful_runs_only() {
  let env = TestEnv::new(
    &[],
    &[
      ("good", SLOW),
      ("bad", r#"{ "nodes": [ { "name": "x", "command": "trace", "args": { "id": "x", "fail": "true" } } ] }"#),
    ],
  );
  env.load();
  let recorder = Arc::new(StatsRecorder::load(env.temp.path().join("stats.json")));
  let recording = recorder.attach(&env.server);

  for name in ["good", "bad", "good"] {
    env.server.initialize_by_name(ctx(), name, &[]).unwrap();
    env.server.start().unwrap().await.unwrap();
  }
  env.server.stop().await;
  recording.await.unwrap();

  let summary = recorder.summary("good").unwrap();
  assert_eq!(summary.count, 2);
  assert!(summary.min >= 0.3);
  assert!(recorder.summary("bad").is_none());
  assert!(env.temp.path().join("stats.json").exists());
}

#[tokio::test]
async fn controller_drives_a_build_and_stats() {
  let env = TestEnv::new(&[], &[("slow", SLOW)]);
  let mut events = env.load();
  let recorder = Arc::new(StatsRecorder::load(env.temp.path().join("stats.json")));
  let recording = recorder.attach(&env.server);

  let stats = recorder.clone();
  let controller = Controller::new(env.server.clone(), ctx())
    .with_handler("stats", "[name]  show build statistics", move |server, context, args| {
      stats.handle_request(server, context, args)
    });

  let Dispatch::Started(handle) = controller.dispatch("build slow").await else {
    panic!("build did not start");
  };
  assert_eq!(handle.await.unwrap(), RunState::Succeeded);

  // Let the recorder catch up before asking for the table.
  tokio::time::timeout(Duration::from_secs(5), async {
    while recorder.summary("slow").is_none() {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("run recorded");

  controller.dispatch("stats").await;
  let table = drain(&mut events).into_iter().find_map(|event| match event {
    ServerEvent::CommonMessage { message, .. } => Some(message),
    _ => None,
  });
  let table = table.expect("stats table published");
  assert!(table.starts_with("Stats:"));
  assert!(table.contains("slow"));

  assert!(matches!(controller.dispatch("stop").await, Dispatch::Stopped));
  recording.await.unwrap();
}
