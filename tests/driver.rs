//! End-to-end tests for the backend driver
//!
//! These tests spawn the mock runner binary through the real supervisor
//! (process mode), then drive it exactly the way a backend test would:
//! directory lookups, action calls, run polling and log streaming.

use std::time::Duration;

use harness::backend::Supervisor;
use harness::directory::{CallOptions, ProjectDirectory, RunWaiter};
use harness::testing::fixtures::{ActionFixture, ConfigFixture, PipelineFixture, ProjectFixture};
use harness::{Error, Instance, RunOutcome, RunStatus};

const MOCK_RUNNER: &str = env!("CARGO_BIN_EXE_mock_runner");

fn supervisor() -> Supervisor {
    Supervisor::process(MOCK_RUNNER)
        .with_health_timeout(Duration::from_secs(10))
        .with_health_interval(Duration::from_millis(50))
}

async fn start_backend(config: &ConfigFixture) -> (Instance, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("failed to create config dir");
    config.write_to(dir.path()).expect("failed to write config");
    let instance = supervisor()
        .start(dir.path())
        .await
        .expect("backend failed to start");
    (instance, dir)
}

fn echo_project() -> ProjectFixture {
    ProjectFixture::new("pipeline-test")
        .with_pipeline(
            "action-pipeline",
            PipelineFixture::shell("echo-job", "echo", "echo 'Action executed'"),
        )
        .with_action("test-action", ActionFixture::on_call(["action-pipeline"]))
}

#[tokio::test]
async fn calling_an_action_runs_the_pipeline_and_streams_logs() {
    let config = ConfigFixture::new().with_project(echo_project());
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());

    let handle = directory.handle("pipeline-test").await.unwrap();
    let actions = handle.list_actions().await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].id, "test-action");

    let run_id = handle
        .call_action("test-action", CallOptions::default())
        .await
        .unwrap();
    assert!(!run_id.is_empty(), "empty run_id returned from action call");

    let run = RunWaiter::new(Duration::from_millis(50))
        .wait_for_terminal(&handle, "action-pipeline", &run_id, Duration::from_secs(10))
        .await
        .unwrap()
        .expect("run never reached a terminal status");
    assert_eq!(run.run_id, run_id);
    assert_eq!(run.status, RunStatus::Finished(RunOutcome::Success));

    let stream = handle
        .stream_run_logs("action-pipeline", &run_id)
        .await
        .unwrap();
    let outcome = stream.wait(Duration::from_secs(10)).await.unwrap();
    assert!(outcome.completed, "stream closed before Done");
    assert!(
        outcome.contains_log("Action executed"),
        "logs were: {}",
        outcome.log_text()
    );

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn empty_configuration_lists_no_projects() {
    let (mut instance, _config_dir) = start_backend(&ConfigFixture::new()).await;
    let mut directory = ProjectDirectory::new(instance.api());

    let projects = directory.list().await.unwrap();
    assert!(projects.is_empty(), "expected no projects, got {projects:?}");

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn lists_and_gets_pipelines() {
    let mut project = ProjectFixture::new("multi-pipeline");
    for id in ["pipeline1", "pipeline2", "pipeline3"] {
        project = project.with_pipeline(id, PipelineFixture::shell("job", "step", "true"));
    }
    let config = ConfigFixture::new().with_project(project);
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());

    let handle = directory.handle("multi-pipeline").await.unwrap();
    let mut ids: Vec<String> = handle
        .list_pipelines()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    ids.sort();
    assert_eq!(ids, ["pipeline1", "pipeline2", "pipeline3"]);

    let pipeline = handle
        .get_pipeline("pipeline2")
        .await
        .unwrap()
        .expect("pipeline2 missing");
    assert_eq!(pipeline.id, "pipeline2");

    assert!(handle.get_pipeline("pipeline9").await.unwrap().is_none());

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn projects_only_see_their_own_pipelines() {
    let config = ConfigFixture::new()
        .with_project(
            ProjectFixture::new("project1")
                .with_pipeline("pipe-a", PipelineFixture::shell("job", "step", "true")),
        )
        .with_project(
            ProjectFixture::new("project2")
                .with_pipeline("pipe-b", PipelineFixture::shell("job", "step", "true")),
        );
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());

    let first = directory.handle("project1").await.unwrap();
    let second = directory.handle("project2").await.unwrap();

    let first_ids: Vec<String> = first
        .list_pipelines()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    let second_ids: Vec<String> = second
        .list_pipelines()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();

    assert_eq!(first_ids, ["pipe-a"]);
    assert_eq!(second_ids, ["pipe-b"]);

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn reload_replaces_the_project_directory() {
    let before = ConfigFixture::new().with_project(
        ProjectFixture::new("old-project")
            .with_pipeline("old-pipe", PipelineFixture::shell("job", "step", "true")),
    );
    let (mut instance, config_dir) = start_backend(&before).await;
    let mut directory = ProjectDirectory::new(instance.api());

    let ids: Vec<String> = directory.list().await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, ["old-project"]);

    // Rewrite the configuration on disk, then reload the backend
    let after = ConfigFixture::new().with_project(
        ProjectFixture::new("new-project")
            .with_pipeline("new-pipe", PipelineFixture::shell("job", "step", "true")),
    );
    after.write_to(config_dir.path()).unwrap();
    directory.reload().await.unwrap();

    let ids: Vec<String> = directory.list().await.unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, ["new-project"]);

    assert!(directory.get("old-project").await.unwrap().is_none());
    let err = directory.handle("old-project").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "got {err:?}");

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn run_ids_are_unique_within_an_instance() {
    let config = ConfigFixture::new().with_project(echo_project());
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());
    let handle = directory.handle("pipeline-test").await.unwrap();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..3 {
        let run_id = handle
            .call_action("test-action", CallOptions::default())
            .await
            .unwrap();
        assert!(!run_id.is_empty());
        assert!(seen.insert(run_id.clone()), "duplicate run id {run_id}");
    }

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn waiter_returns_none_when_the_run_outlives_the_timeout() {
    let config = ConfigFixture::new().with_project(
        ProjectFixture::new("slow")
            .with_pipeline("slow-pipe", PipelineFixture::shell("job", "nap", "sleep 5"))
            .with_action("go", ActionFixture::on_call(["slow-pipe"])),
    );
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());
    let handle = directory.handle("slow").await.unwrap();

    let run_id = handle.call_action("go", CallOptions::default()).await.unwrap();

    let run = RunWaiter::new(Duration::from_millis(50))
        .wait_for_terminal(&handle, "slow-pipe", &run_id, Duration::from_millis(400))
        .await
        .unwrap();
    assert!(run.is_none(), "a 5s pipeline cannot finish in 400ms");

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn following_a_live_run_delivers_its_events() {
    let config = ConfigFixture::new().with_project(echo_project());
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());
    let handle = directory.handle("pipeline-test").await.unwrap();

    let run_id = handle
        .call_action("test-action", CallOptions::default())
        .await
        .unwrap();

    // Follow the run by its own id; buffered frames are replayed, so
    // connecting after completion still yields the full sequence.
    let stream = handle.follow_run(&run_id).await.unwrap();
    let outcome = stream.wait(Duration::from_secs(10)).await.unwrap();

    assert!(outcome.completed);
    assert!(outcome.contains_log("Action executed"));
    assert!(outcome.statuses().count() >= 1);

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn dry_run_triggers_finish_without_executing_steps() {
    let config = ConfigFixture::new().with_project(echo_project());
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());
    let handle = directory.handle("pipeline-test").await.unwrap();

    let run_id = handle
        .call_action(
            "test-action",
            CallOptions {
                dry_run: true,
                params: None,
            },
        )
        .await
        .unwrap();

    let run = RunWaiter::new(Duration::from_millis(50))
        .wait_for_terminal(&handle, "action-pipeline", &run_id, Duration::from_secs(10))
        .await
        .unwrap()
        .expect("dry run never finished");
    assert_eq!(run.status, RunStatus::Finished(RunOutcome::Success));

    let outcome = handle
        .follow_run(&run_id)
        .await
        .unwrap()
        .wait(Duration::from_secs(10))
        .await
        .unwrap();
    assert!(outcome.completed);
    assert!(
        !outcome.contains_log("Action executed"),
        "dry run must not execute steps"
    );

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn failing_steps_finish_with_a_failure_outcome() {
    let config = ConfigFixture::new().with_project(
        ProjectFixture::new("broken")
            .with_pipeline("bad-pipe", PipelineFixture::shell("job", "boom", "exit 3"))
            .with_action("go", ActionFixture::on_call(["bad-pipe"])),
    );
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());
    let handle = directory.handle("broken").await.unwrap();

    let run_id = handle.call_action("go", CallOptions::default()).await.unwrap();
    let run = RunWaiter::new(Duration::from_millis(50))
        .wait_for_terminal(&handle, "bad-pipe", &run_id, Duration::from_secs(10))
        .await
        .unwrap()
        .expect("run never finished");
    assert_eq!(run.status, RunStatus::Finished(RunOutcome::Failure));

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_project_is_not_found_after_a_refresh() {
    let (mut instance, _config_dir) = start_backend(&ConfigFixture::new()).await;
    let mut directory = ProjectDirectory::new(instance.api());

    let err = directory.handle("no-such-project").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "got {err:?}");

    assert!(directory.get("no-such-project").await.unwrap().is_none());

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_run_reads_as_none() {
    let config = ConfigFixture::new().with_project(echo_project());
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());
    let handle = directory.handle("pipeline-test").await.unwrap();

    let run = handle.get_run("action-pipeline", "run-does-not-exist").await.unwrap();
    assert!(run.is_none());

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn calling_an_unknown_action_surfaces_the_backend_error() {
    let config = ConfigFixture::new().with_project(echo_project());
    let (mut instance, _config_dir) = start_backend(&config).await;
    let mut directory = ProjectDirectory::new(instance.api());
    let handle = directory.handle("pipeline-test").await.unwrap();

    let err = handle
        .call_action("missing-action", CallOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::Http { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("missing-action"), "body was: {body}");
        }
        other => panic!("expected an HTTP error, got {other:?}"),
    }

    instance.stop().await.unwrap();
}

#[tokio::test]
async fn missing_executable_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    ConfigFixture::new().write_to(dir.path()).unwrap();

    let err = Supervisor::process("definitely-not-a-real-backend-binary")
        .start(dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StartupFailed { .. }), "got {err:?}");
}

#[tokio::test]
async fn early_exit_fails_startup_with_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    ConfigFixture::new().write_to(dir.path()).unwrap();

    // `sh` rejects the --port/--config launch contract and exits
    // immediately, which must surface as a startup failure rather than
    // a health-gate hang.
    let err = Supervisor::process("sh")
        .with_health_timeout(Duration::from_secs(30))
        .start(dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StartupFailed { .. }), "got {err:?}");
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (mut instance, _config_dir) = start_backend(&ConfigFixture::new()).await;
    instance.stop().await.unwrap();
    instance.stop().await.unwrap();
}
