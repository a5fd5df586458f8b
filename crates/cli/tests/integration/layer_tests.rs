//! Inspect, history and export integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

const RECIPE: &str = "FROM scratch\nENV MODE=release\nWORKDIR /srv\nRUN echo $MODE > mode.txt\n";

#[test]
fn inspect_shows_metadata() {
  let env = TestEnv::new();
  env.write_recipe(RECIPE);
  let artifact = env.build_artifact();

  env
    .layerbuild_cmd()
    .args(["inspect", &artifact])
    .assert()
    .success()
    .stdout(predicate::str::contains(artifact.as_str()))
    .stdout(predicate::str::contains("RUN echo $MODE > mode.txt"))
    .stdout(predicate::str::contains("MODE=release"))
    .stdout(predicate::str::contains("/srv"));
}

#[test]
fn inspect_accepts_short_prefix() {
  let env = TestEnv::new();
  env.write_recipe(RECIPE);
  let artifact = env.build_artifact();

  let output = env
    .layerbuild_cmd()
    .args(["inspect", &artifact[..12], "--output", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());
  let layer: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

  assert_eq!(layer["id"], artifact.as_str());
  assert_eq!(layer["config"]["workdir"], "/srv");
  assert_eq!(layer["config"]["env"]["MODE"], "release");
  assert_eq!(layer["instruction"]["kind"], "run_command");
}

#[test]
fn history_lists_newest_first() {
  let env = TestEnv::new();
  env.write_recipe(RECIPE);
  let artifact = env.build_artifact();

  let output = env.layerbuild_cmd().args(["history", &artifact]).output().unwrap();
  assert!(output.status.success());
  let stdout = String::from_utf8(output.stdout).unwrap();
  let lines: Vec<_> = stdout.lines().collect();

  assert_eq!(lines.len(), 4);
  assert!(lines[0].starts_with(&artifact[..12]));
  assert!(lines[0].contains("RUN"));
  assert!(lines[3].contains("FROM scratch"));
}

#[test]
fn export_writes_full_tree() {
  let env = TestEnv::new();
  env.write_recipe(RECIPE);
  let artifact = env.build_artifact();
  let dest = env.temp.path().join("rootfs");

  env
    .layerbuild_cmd()
    .args(["export", &artifact])
    .arg(&dest)
    .assert()
    .success()
    .stdout(predicate::str::contains("Exported"));

  assert_eq!(
    std::fs::read_to_string(dest.join("srv/mode.txt")).unwrap(),
    "release\n"
  );
}

#[test]
fn export_refuses_non_empty_destination() {
  let env = TestEnv::new();
  env.write_recipe(RECIPE);
  let artifact = env.build_artifact();
  env.write_file("occupied/keep", "x");

  env
    .layerbuild_cmd()
    .args(["export", &artifact])
    .arg(env.temp.path().join("occupied"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("not empty"));
}
