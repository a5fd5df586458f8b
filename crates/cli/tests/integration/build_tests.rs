//! Build command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

const SIMPLE: &str = "FROM scratch\nRUN echo a > a.txt\nRUN echo b > b.txt\n";

#[test]
fn build_prints_steps_and_artifact() {
  let env = TestEnv::new();
  env.write_recipe(SIMPLE);

  env
    .build_cmd()
    .assert()
    .success()
    .stdout(predicate::str::contains("[0] FROM"))
    .stdout(predicate::str::contains("[2] RUN"))
    .stdout(predicate::str::contains("Built "))
    .stdout(predicate::str::contains("3 executed, 0 cached"));
}

#[test]
fn second_build_is_fully_cached() {
  let env = TestEnv::new();
  env.write_recipe(SIMPLE);

  let first = env.build_json();
  let second = env.build_json();

  assert_eq!(first["artifact"], second["artifact"]);
  let outcomes: Vec<_> = second["steps"]
    .as_array()
    .unwrap()
    .iter()
    .map(|s| s["outcome"].as_str().unwrap().to_string())
    .collect();
  assert_eq!(outcomes, vec!["cached", "cached", "cached"]);
}

#[test]
fn no_cache_flag_skips_lookup() {
  let env = TestEnv::new();
  env.write_recipe(SIMPLE);
  env.build_artifact();

  let output = env
    .build_cmd()
    .args(["--no-cache", "--output", "json"])
    .output()
    .unwrap();
  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

  assert_eq!(report["status"], "succeeded");
  assert!(
    report["steps"]
      .as_array()
      .unwrap()
      .iter()
      .all(|s| s["outcome"] != "cached")
  );
}

#[test]
fn copy_uses_context_directory() {
  let env = TestEnv::new();
  env.write_context_file("app/main.sh", "echo hi");
  env.write_recipe("FROM scratch\nCOPY app /opt/app\n");

  let artifact = env.build_artifact();
  let dest = env.temp.path().join("out");
  env
    .layerbuild_cmd()
    .args(["export", &artifact])
    .arg(&dest)
    .assert()
    .success();

  assert_eq!(
    std::fs::read_to_string(dest.join("opt/app/main.sh")).unwrap(),
    "echo hi"
  );
}

#[test]
fn failing_command_exits_nonzero_with_stderr() {
  let env = TestEnv::new();
  env.write_recipe("FROM scratch\nRUN echo broken >&2; exit 3\n");

  env
    .build_cmd()
    .assert()
    .failure()
    .stdout(predicate::str::contains("[0] FROM"))
    .stderr(predicate::str::contains("CommandError"))
    .stderr(predicate::str::contains("exit code 3"))
    .stderr(predicate::str::contains("broken"));
}

#[test]
fn failure_report_names_kind_and_step() {
  let env = TestEnv::new();
  env.write_recipe("FROM scratch\nCOPY missing.txt /dst\n");

  let report = env.build_json();

  assert_eq!(report["status"], "failed");
  assert!(report["artifact"].is_null());
  assert_eq!(report["error"]["kind"], "path");
  assert_eq!(report["error"]["step"], 1);
  assert_eq!(report["steps"].as_array().unwrap().len(), 1);
}

#[test]
fn syntax_error_is_reported_with_line() {
  let env = TestEnv::new();
  env.write_recipe("FROM scratch\nRUN\n");

  env
    .build_cmd()
    .assert()
    .failure()
    .stderr(predicate::str::contains("SyntaxError"))
    .stderr(predicate::str::contains("line 2"));
}

#[test]
fn timeout_flag_limits_run() {
  let env = TestEnv::new();
  env.write_recipe("FROM scratch\nRUN sleep 5\n");

  env
    .build_cmd()
    .args(["--timeout", "200ms"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("TimeoutError"));
}

#[test]
fn store_flag_overrides_environment() {
  let env = TestEnv::new();
  env.write_recipe(SIMPLE);
  let other = env.temp.path().join("other-store");

  env.build_cmd().arg("--store").arg(&other).assert().success();

  assert!(other.join("layers").read_dir().unwrap().next().is_some());
  assert!(!env.store_path().exists());
}
