//! Ordering and failure behavior of complete runs.

use taskforge_lib::events::ServerEvent;
use taskforge_lib::server::RunState;

use super::common::{TestEnv, ctx, drain};

const MIXED: &str = r#"{ "nodes": [
  { "name": "A", "command": "trace", "args": { "id": "A" } },
  { "name": "B", "command": "trace", "args": { "id": "B", "sleep_ms": "300" }, "isParallel": true },
  { "name": "C", "command": "trace", "args": { "id": "C" }, "isParallel": true, "parallelQueue": 1 },
  { "name": "D", "command": "trace", "args": { "id": "D" }, "isParallel": true, "parallelQueue": 1 }
] }"#;

#[tokio::test]
async fn sequential_then_batch_with_queue() {
  let env = TestEnv::new(&[], &[("mixed", MIXED)]);
  env.load();

  env.server.initialize_by_name(ctx(), "mixed", &[]).unwrap();
  let state = env.server.start().unwrap().await.unwrap();
  assert_eq!(state, RunState::Succeeded);

  // A completes before B, C, D start.
  let a_end = env.position("end:A");
  for node in ["B", "C", "D"] {
    assert!(a_end < env.position(&format!("start:{node}")));
  }
  // D starts only after C completes.
  assert!(env.position("end:C") < env.position("start:D"));
  // B runs concurrently with the C -> D chain.
  assert!(env.position("start:D") < env.position("end:B"));
}

#[tokio::test]
async fn failure_aborts_and_skips_later_steps() {
  let env = TestEnv::new(
    &[],
    &[(
      "failing",
      r#"{ "nodes": [
        { "name": "ok", "command": "trace", "args": { "id": "ok" } },
        { "name": "bad", "command": "trace", "args": { "id": "bad", "fail": "true" } },
        { "name": "p1", "command": "trace", "args": { "id": "p1" }, "isParallel": true },
        { "name": "last", "command": "trace", "args": { "id": "last" } }
      ] }"#,
    )],
  );
  let mut events = env.load();

  env.server.initialize_by_name(ctx(), "failing", &[]).unwrap();
  assert_eq!(env.server.start().unwrap().await.unwrap(), RunState::Aborted);

  assert_eq!(env.log(), vec!["start:ok", "end:ok", "start:bad", "end:bad"]);

  let events = drain(&mut events);
  let done = events.iter().find_map(|event| match event {
    ServerEvent::BuildDone { process, success } => Some((process.clone(), *success)),
    _ => None,
  });
  let (process, success) = done.expect("BuildDone published");
  assert!(!success);
  assert_eq!(process.state, RunState::Aborted);
  assert_eq!(process.tasks.len(), 2);
}

#[tokio::test]
async fn failing_batch_member_lets_siblings_finish() {
  let env = TestEnv::new(
    &[],
    &[(
      "batch",
      r#"{ "nodes": [
        { "name": "bad", "command": "trace", "args": { "id": "bad", "fail": "true" }, "isParallel": true },
        { "name": "slow", "command": "trace", "args": { "id": "slow", "sleep_ms": "200" }, "isParallel": true },
        { "name": "after", "command": "trace", "args": { "id": "after" } }
      ] }"#,
    )],
  );
  env.load();

  env.server.initialize_by_name(ctx(), "batch", &[]).unwrap();
  assert_eq!(env.server.start().unwrap().await.unwrap(), RunState::Aborted);

  assert!(env.log().contains(&"end:slow".to_string()));
  assert!(!env.log().contains(&"start:after".to_string()));
}

#[tokio::test]
async fn results_flow_between_nodes() {
  let env = TestEnv::new(
    &[("suffix", "-final")],
    &[(
      "chain",
      r#"{ "args": ["tag"], "nodes": [
        { "name": "first", "command": "trace", "args": { "id": "{tag}" } },
        { "name": "second", "command": "trace", "args": { "id": "{first:result}{suffix}" } },
        { "name": "verify", "command": "check", "args": { "condition": "{second:message}", "value": "v1-final done" } }
      ] }"#,
    )],
  );
  env.load();

  env.server.initialize_by_name(ctx(), "chain", &["v1".to_string()]).unwrap();
  assert_eq!(env.server.start().unwrap().await.unwrap(), RunState::Succeeded);
  assert!(env.log().contains(&"start:v1-final".to_string()));
}

#[tokio::test]
async fn task_events_are_published_per_node() {
  let env = TestEnv::new(
    &[],
    &[(
      "two",
      r#"{ "nodes": [
        { "name": "x", "command": "trace", "args": { "id": "x" } },
        { "name": "y", "command": "trace", "args": { "id": "y" } }
      ] }"#,
    )],
  );
  let mut events = env.load();

  env.server.initialize_by_name(ctx(), "two", &[]).unwrap();
  env.server.start().unwrap().await.unwrap();

  let mut started = Vec::new();
  let mut done = Vec::new();
  for event in drain(&mut events) {
    match event {
      ServerEvent::TaskStarted { node, .. } => started.push(node),
      ServerEvent::TaskDone { record, .. } => {
        assert!(record.is_success());
        done.push(record.node);
      }
      _ => {}
    }
  }
  assert_eq!(started, vec!["x", "y"]);
  assert_eq!(done, vec!["x", "y"]);
}

#[tokio::test]
async fn batch_members_do_not_see_each_other() {
  let env = TestEnv::new(
    &[],
    &[(
      "fanout",
      r#"{ "nodes": [
        { "name": "seed", "command": "trace", "args": { "id": "seed" } },
        { "name": "b", "command": "trace", "args": { "id": "b", "sleep_ms": "10" }, "isParallel": true },
        { "name": "c", "command": "trace", "args": { "id": "c", "sleep_ms": "200" }, "isParallel": true, "parallelQueue": 1 },
        { "name": "d", "command": "trace", "args": { "id": "d-{seed:result}-{b:result}-{c:result}" }, "isParallel": true, "parallelQueue": 1 },
        { "name": "after", "command": "trace", "args": { "id": "after-{b:result}-{c:result}" } }
      ] }"#,
    )],
  );
  env.load();

  env.server.initialize_by_name(ctx(), "fanout", &[]).unwrap();
  assert_eq!(env.server.start().unwrap().await.unwrap(), RunState::Succeeded);

  // b finished long before d started, and c is d's queue predecessor, yet
  // neither is visible inside the batch. The earlier step is.
  assert!(env.position("end:b") < env.position("start:d-seed-{b:result}-{c:result}"));
  // After the join every member's output is visible.
  assert!(env.log().contains(&"start:after-b-c".to_string()));
}
