//! Loading definition directories into the server catalog.

use taskforge_lib::build::BuildError;
use taskforge_lib::events::ServerEvent;
use taskforge_lib::server::RunState;

use super::common::{TestEnv, ctx, drain};

#[test]
fn inlining_is_exhaustive() {
  let env = TestEnv::new(
    &[],
    &[
      (
        "release",
        r#"{ "nodes": [
          { "name": "pre", "command": "trace", "args": { "id": "pre" } },
          { "name": "pkg", "subBuild": "package", "subBuildArgs": { "target": "linux" } },
          { "name": "post", "command": "trace", "args": { "id": "post" } }
        ] }"#,
      ),
      (
        "package",
        r#"{ "nodes": [
          { "name": "compile", "subBuild": "compile", "args": { "flavor": "{target}-release" } },
          { "name": "zip", "command": "trace", "args": { "id": "zip-{target}" } }
        ] }"#,
      ),
      ("compile", r#"{ "nodes": [ { "name": "cc", "command": "trace", "args": { "id": "cc-{flavor}" } } ] }"#),
    ],
  );
  env.load();

  let release = env.server.find_build("release").unwrap();
  let ids: Vec<_> = release.nodes.iter().map(|node| node.args["id"].as_str()).collect();
  assert_eq!(ids, vec!["pre", "cc-linux-release", "zip-linux", "post"]);
  assert_eq!(env.server.catalog().len(), 3);
}

#[tokio::test]
async fn dangling_reference_excludes_only_its_build() {
  let env = TestEnv::new(
    &[],
    &[
      ("broken", r#"{ "nodes": [ { "name": "x", "subBuild": "nowhere" } ] }"#),
      ("independent", r#"{ "nodes": [ { "name": "n", "command": "trace", "args": { "id": "n" } } ] }"#),
    ],
  );
  let mut events = env.load();

  let catalog = env.server.catalog();
  assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["independent"]);
  assert!(matches!(
    catalog.failures(),
    [(name, BuildError::SubBuildNotFound { .. })] if name == "broken"
  ));

  let errors: Vec<_> = drain(&mut events)
    .into_iter()
    .filter_map(|event| match event {
      ServerEvent::CommonError { message, is_fatal } => Some((message, is_fatal)),
      _ => None,
    })
    .collect();
  assert_eq!(errors.len(), 1);
  assert!(errors[0].0.contains("broken"));
  assert!(!errors[0].1);

  env.server.initialize_by_name(ctx(), "independent", &[]).unwrap();
  assert_eq!(env.server.start().unwrap().await.unwrap(), RunState::Succeeded);
}

#[test]
fn cyclic_references_fail_instead_of_recursing() {
  let env = TestEnv::new(
    &[],
    &[
      ("a", r#"{ "nodes": [ { "name": "to-b", "subBuild": "b" } ] }"#),
      ("b", r#"{ "nodes": [ { "name": "to-c", "subBuild": "c" } ] }"#),
      ("c", r#"{ "nodes": [ { "name": "to-a", "subBuild": "a" } ] }"#),
      ("uses_cycle", r#"{ "nodes": [ { "name": "x", "subBuild": "a" } ] }"#),
    ],
  );
  env.load();

  let catalog = env.server.catalog();
  assert!(catalog.is_empty());
  for (name, error) in catalog.failures() {
    match error {
      BuildError::CyclicSubBuild { chain } => {
        assert_eq!(chain.first(), chain.last(), "{name}: {chain:?}");
        assert_eq!(chain.len(), 4);
      }
      other => panic!("{name}: unexpected {other}"),
    }
  }
}

#[test]
fn unregistered_command_excludes_build() {
  let env = TestEnv::new(
    &[],
    &[("odd", r#"{ "nodes": [ { "name": "n", "command": "summon" } ] }"#)],
  );
  env.load();

  assert!(env.server.find_build("odd").is_none());
  assert!(matches!(
    env.server.catalog().failures(),
    [(_, BuildError::CommandNotFound { command, .. })] if command == "summon"
  ));
}

#[test]
fn inlining_that_repeats_a_node_name_excludes_build() {
  let env = TestEnv::new(
    &[],
    &[
      (
        "twice",
        r#"{ "nodes": [
          { "name": "one", "subBuild": "step", "args": { "n": "1" } },
          { "name": "two", "subBuild": "step", "args": { "n": "2" } }
        ] }"#,
      ),
      ("step", r#"{ "nodes": [ { "name": "work", "command": "trace", "args": { "id": "{n}" } } ] }"#),
    ],
  );
  let mut events = env.load();

  assert!(env.server.find_build("twice").is_none());
  assert!(env.server.find_build("step").is_some());
  let reported = drain(&mut events).into_iter().any(|event| {
    matches!(event, ServerEvent::CommonError { message, is_fatal: false } if message.contains("duplicate node name 'work'"))
  });
  assert!(reported);
}
