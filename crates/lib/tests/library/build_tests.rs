//! Recipe builds end to end: caching, failure semantics and layer contents.

use std::time::Duration;

use layerbuild_lib::build::{BuildStatus, ErrorKind, StepOutcome};
use layerbuild_lib::cache::compute_key;
use layerbuild_lib::execute::actions::shell_command;
use layerbuild_lib::recipe::Instruction;
use tokio_util::sync::CancellationToken;

use super::common::{Workspace, read};

const SIMPLE: &str = r#"
FROM scratch
RUN echo a > a.txt
RUN echo b > b.txt
"#;

mod caching {
  use super::*;

  #[tokio::test]
  async fn identical_inputs_yield_identical_artifacts() {
    let first = Workspace::new();
    let second = Workspace::new();

    let a = first.build(SIMPLE).await;
    let b = second.build(SIMPLE).await;

    assert!(a.is_success(), "{:?}", a.error);
    assert!(b.is_success(), "{:?}", b.error);
    assert_eq!(a.artifact, b.artifact);
  }

  #[tokio::test]
  async fn rebuilding_unchanged_recipe_executes_nothing() {
    let ws = Workspace::new();

    let first = ws.build(SIMPLE).await;
    let second = ws.build(SIMPLE).await;

    assert_eq!(first.executed(), 3);
    assert_eq!(second.executed(), 0);
    assert_eq!(second.cached(), 3);
    assert_eq!(first.artifact, second.artifact);
  }

  #[tokio::test]
  async fn editing_copy_source_invalidates_from_that_step() {
    let ws = Workspace::new();
    ws.write("app.py", "print('v1')");
    let recipe = r#"
FROM scratch
RUN echo setup > setup.txt
COPY app.py /app/
RUN cat app/app.py > copied.txt
"#;

    let first = ws.build(recipe).await;
    ws.write("app.py", "print('v2')");
    let second = ws.build(recipe).await;

    assert!(second.is_success(), "{:?}", second.error);
    let outcomes: Vec<_> = second.steps.iter().map(|s| s.outcome).collect();
    assert_eq!(
      outcomes,
      vec![
        StepOutcome::Cached,
        StepOutcome::Cached,
        StepOutcome::Executed,
        StepOutcome::Executed
      ]
    );
    assert_ne!(first.artifact, second.artifact);
    assert_eq!(read(&ws.export(&second).join("copied.txt")), "print('v2')");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn chmod_of_copied_file_invalidates_copy() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::new();
    ws.write("run.sh", "#!/bin/sh\necho ran\n");
    let script = ws.context.join("run.sh");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();
    let recipe = "FROM scratch\nCOPY run.sh /run.sh\n";

    let first = ws.build(recipe).await;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let second = ws.build(recipe).await;

    assert!(second.is_success(), "{:?}", second.error);
    let outcomes: Vec<_> = second.steps.iter().map(|s| s.outcome).collect();
    assert_eq!(outcomes, vec![StepOutcome::Cached, StepOutcome::Executed]);
    assert_ne!(first.artifact, second.artifact);
    let exported = ws.export(&second).join("run.sh");
    assert_eq!(std::fs::metadata(exported).unwrap().permissions().mode() & 0o777, 0o755);
  }

  #[tokio::test]
  async fn shell_override_invalidates_run() {
    if !std::path::Path::new("/bin/bash").exists() {
      return;
    }
    let ws = Workspace::new();
    let recipe = "FROM scratch\nRUN echo \"${BASH_VERSION:-none}\" > v\n";

    let first = ws.build(recipe).await;
    assert!(first.is_success(), "{:?}", first.error);

    let builder = layerbuild_lib::build::Builder::new(ws.store.clone(), ws.config().with_shell(Some("/bin/bash".into())));
    let second = builder
      .build_text(recipe, &ws.context, &CancellationToken::new())
      .await;

    assert!(second.is_success(), "{:?}", second.error);
    let outcomes: Vec<_> = second.steps.iter().map(|s| s.outcome).collect();
    assert_eq!(outcomes, vec![StepOutcome::Cached, StepOutcome::Executed]);
    assert_ne!(first.artifact, second.artifact);
    assert_ne!(read(&ws.export(&second).join("v")), "none\n");
  }

  #[tokio::test]
  async fn cache_hit_restores_env_and_workdir() {
    let ws = Workspace::new();
    let base = r#"
FROM scratch
ENV GREETING=hello
WORKDIR /app
"#;
    ws.build(base).await;

    let extended = format!("{}RUN printf %s \"$GREETING\" > greeting.txt\n", base);
    let outcome = ws.build(&extended).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.cached(), 3);
    assert_eq!(read(&ws.export(&outcome).join("app/greeting.txt")), "hello");
  }

  #[tokio::test]
  async fn no_cache_reexecutes_but_converges_on_same_layers() {
    let ws = Workspace::new();
    let cached = ws.build(SIMPLE).await;

    let builder = layerbuild_lib::build::Builder::new(ws.store.clone(), ws.config().with_no_cache(true));
    let uncached = builder
      .build_text(SIMPLE, &ws.context, &CancellationToken::new())
      .await;

    assert!(uncached.is_success(), "{:?}", uncached.error);
    assert_eq!(uncached.cached(), 0);
    assert!(uncached.steps.iter().all(|s| s.outcome == StepOutcome::Reused));
    assert_eq!(cached.artifact, uncached.artifact);
  }

  #[tokio::test]
  async fn corrupted_layer_is_rebuilt() {
    let ws = Workspace::new();
    let first = ws.build(SIMPLE).await;
    let tampered = &first.steps[1].layer;
    std::fs::write(ws.store.diff_dir(tampered).join("a.txt"), "tampered\n").unwrap();

    let second = ws.build(SIMPLE).await;

    let outcomes: Vec<_> = second.steps.iter().map(|s| s.outcome).collect();
    assert_eq!(outcomes[0], StepOutcome::Cached);
    assert_eq!(outcomes[1], StepOutcome::Executed);
    assert_eq!(second.artifact, first.artifact);
    assert_eq!(read(&ws.export(&second).join("a.txt")), "a\n");
  }
}

mod failures {
  use super::*;

  #[tokio::test]
  async fn failing_command_stops_the_build() {
    let ws = Workspace::new();
    let recipe = r#"
FROM scratch
RUN echo a > a.txt
RUN exit 1
RUN echo b > b.txt
"#;

    let outcome = ws.build(recipe).await;

    assert_eq!(outcome.status, BuildStatus::Failed);
    assert!(outcome.artifact.is_none());
    let err = outcome.error.as_ref().unwrap();
    assert_eq!(err.kind(), ErrorKind::Command);
    assert_eq!(err.step_index(), Some(2));

    assert_eq!(outcome.steps.len(), 2);
    for step in &outcome.steps {
      assert!(ws.store.contains(&step.layer));
    }
    let failed_key = compute_key(
      Some(&outcome.steps[1].layer),
      &Instruction::RunCommand {
        command: "exit 1".to_string(),
      },
      &[],
      &shell_command(None),
    )
    .unwrap();
    assert!(!ws.store.contains(&failed_key.layer_id()));
    assert_eq!(ws.layer_count(), 2);
    assert_eq!(ws.staging_count(), 0);
  }

  #[tokio::test]
  async fn command_error_carries_exit_code_and_stderr() {
    let ws = Workspace::new();

    let outcome = ws.build("FROM scratch\nRUN echo boom >&2; exit 7\n").await;

    let err = outcome.error.unwrap();
    let message = format!("{}", err);
    assert!(message.contains("line 2"), "{}", message);
    match err {
      layerbuild_lib::build::BuildError::Step { source, .. } => match source {
        layerbuild_lib::execute::ExecuteError::Command {
          exit_code, stderr_tail, ..
        } => {
          assert_eq!(exit_code, Some(7));
          assert_eq!(stderr_tail, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
      },
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn missing_copy_source_is_path_error() {
    let ws = Workspace::new();

    let outcome = ws.build("FROM scratch\nCOPY missing.txt dst\n").await;

    let err = outcome.error.unwrap();
    assert_eq!(err.kind(), ErrorKind::Path);
    assert!(err.to_string().contains("missing.txt"));
    assert_eq!(outcome.steps.len(), 1);
  }

  #[tokio::test]
  async fn copy_outside_context_is_rejected() {
    let ws = Workspace::new();

    let outcome = ws.build("FROM scratch\nCOPY ../store/layers /stolen\n").await;

    assert_eq!(outcome.error.unwrap().kind(), ErrorKind::Path);
  }

  #[tokio::test]
  async fn syntax_error_never_starts() {
    let ws = Workspace::new();

    let outcome = ws.build("FROM scratch\nFETCH http://example.com\n").await;

    assert_eq!(outcome.status, BuildStatus::Failed);
    assert_eq!(outcome.error.unwrap().kind(), ErrorKind::Syntax);
    assert!(outcome.steps.is_empty());
    assert_eq!(ws.layer_count(), 0);
  }

  #[tokio::test]
  async fn unknown_base_executes_nothing() {
    let ws = Workspace::new();

    let outcome = ws.build("FROM ubuntu:22.04\nRUN echo hi > hi\n").await;

    let err = outcome.error.unwrap();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert_eq!(err.step_index(), Some(0));
    assert_eq!(ws.layer_count(), 0);
  }

  #[tokio::test]
  async fn timeout_discards_partial_layer() {
    let ws = Workspace::new();
    let builder = ws.builder_with_timeout(Duration::from_millis(200));

    let outcome = builder
      .build_text(
        "FROM scratch\nRUN touch partial; sleep 5\n",
        &ws.context,
        &CancellationToken::new(),
      )
      .await;

    assert_eq!(outcome.error.unwrap().kind(), ErrorKind::Timeout);
    assert_eq!(ws.layer_count(), 1);
    assert_eq!(ws.staging_count(), 0);
  }

  #[tokio::test]
  async fn cancelled_before_start_builds_nothing() {
    let ws = Workspace::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = ws.builder().build_text(SIMPLE, &ws.context, &cancel).await;

    let err = outcome.error.unwrap();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.step_index(), Some(0));
    assert_eq!(ws.layer_count(), 0);
  }

  #[tokio::test]
  async fn cancellation_interrupts_running_command() {
    let ws = Workspace::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(200)).await;
      trigger.cancel();
    });

    let started = std::time::Instant::now();
    let outcome = ws
      .builder()
      .build_text(
        "FROM scratch\nRUN sleep 5\nRUN echo never > never\n",
        &ws.context,
        &cancel,
      )
      .await;

    assert!(started.elapsed() < Duration::from_secs(4));
    let err = outcome.error.unwrap();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.step_index(), Some(1));
    assert_eq!(ws.layer_count(), 1);
    assert_eq!(ws.staging_count(), 0);
  }
}

mod contents {
  use super::*;

  #[tokio::test]
  async fn layers_apply_over_imported_base() {
    let ws = Workspace::new();
    ws.import_base("tiny", &[("etc/os-release", "ID=tiny\n"), ("etc/motd", "hi\n")]);
    ws.write("src/main.py", "print('hi')");
    let recipe = r#"
# provision
FROM tiny
WORKDIR /srv
COPY src /srv/app
RUN rm ../etc/motd && \
    echo installed > installed.txt
"#;

    let outcome = ws.build(recipe).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    let root = ws.export(&outcome);
    assert_eq!(read(&root.join("etc/os-release")), "ID=tiny\n");
    assert!(!root.join("etc/motd").exists());
    assert_eq!(read(&root.join("srv/app/main.py")), "print('hi')");
    assert_eq!(read(&root.join("srv/installed.txt")), "installed\n");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn read_only_directory_carries_into_later_steps() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::new();
    let recipe = r#"
FROM scratch
RUN mkdir ro && touch ro/f && chmod 555 ro
RUN ls ro > listing
"#;

    let outcome = ws.build(recipe).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    let root = ws.export(&outcome);
    assert!(root.join("ro/f").exists());
    assert_eq!(read(&root.join("listing")), "f\n");
    assert_eq!(std::fs::metadata(root.join("ro")).unwrap().permissions().mode() & 0o777, 0o555);
    assert_eq!(ws.staging_count(), 0);
    layerbuild_lib::util::fs::make_tree_writable(&root).unwrap();
  }

  #[tokio::test]
  async fn history_follows_recipe_order() {
    let ws = Workspace::new();
    let outcome = ws.build(SIMPLE).await;

    let history = ws.store.history(outcome.artifact.as_ref().unwrap()).unwrap();

    let kinds: Vec<_> = history.iter().rev().map(|l| l.instruction.kind().keyword()).collect();
    assert_eq!(kinds, vec!["FROM", "RUN", "RUN"]);
    assert!(history.last().unwrap().parent.is_none());
  }

  #[tokio::test]
  async fn reimported_base_invalidates_everything() {
    let ws = Workspace::new();
    ws.import_base("tiny", &[("v", "1")]);
    let recipe = "FROM tiny\nRUN cat v > seen\n";
    let first = ws.build(recipe).await;

    ws.import_base("tiny", &[("v", "2")]);
    let second = ws.build(recipe).await;

    assert_eq!(second.executed(), 2);
    assert_ne!(first.artifact, second.artifact);
    assert_eq!(read(&ws.export(&second).join("seen")), "2");
  }

  #[tokio::test]
  async fn build_file_reads_recipe_from_disk() {
    let ws = Workspace::new();
    let path = ws.temp.path().join("Recipe");
    std::fs::write(&path, SIMPLE).unwrap();

    let outcome = ws
      .builder()
      .build_file(&path, &ws.context, &CancellationToken::new())
      .await;

    assert!(outcome.is_success(), "{:?}", outcome.error);

    let missing = ws
      .builder()
      .build_file(&ws.temp.path().join("nope"), &ws.context, &CancellationToken::new())
      .await;
    assert_eq!(missing.error.unwrap().kind(), ErrorKind::Io);
  }
}
