//! Runner integration tests: pieces from disk, concurrent tasks, prefixed
//! output and the watch loop.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use takt::adapters::agents::{MockAgent, MockReply};
use takt::domain::models::{TaskSpec, TaskStatus};
use takt::infrastructure::pieces::PieceLoader;
use takt::services::{RunnerOptions, SharedSink, TaskLifecycleService, TaskRunner, WorktreeService};

const REVIEWED: &str = r#"
name: reviewed
movements:
  - name: implement
    persona: coder
  - name: review
    persona: reviewer
    rules:
      - condition: approved
        next: COMPLETE
      - condition: rejected
        next: ABORT
"#;

fn runner(
    project: &Path,
    agent: &MockAgent,
    sink: SharedSink,
    poll_interval: Duration,
) -> (Arc<TaskRunner>, Arc<TaskLifecycleService>) {
    let pieces_dir = project.join(".takt/pieces");
    std::fs::create_dir_all(&pieces_dir).unwrap();
    std::fs::write(pieces_dir.join("reviewed.yaml"), REVIEWED).unwrap();

    let lifecycle = Arc::new(common::file_lifecycle(
        &project.join(".takt/tasks.yaml"),
        std::process::id(),
    ));
    let runner = TaskRunner::new(
        lifecycle.clone(),
        Arc::new(PieceLoader::new(vec![pieces_dir])),
        Arc::new(agent.clone()),
        WorktreeService::new(project, ".takt/worktrees"),
        project,
    )
    .with_options(RunnerOptions {
        concurrency: 2,
        poll_interval,
        default_piece: "reviewed".to_string(),
        plain_output: true,
        ..Default::default()
    })
    .with_sink(sink);
    (Arc::new(runner), lifecycle)
}

#[tokio::test]
async fn test_run_pending_records_success_and_abort() {
    let dir = common::temp_dir();
    let agent = MockAgent::with_default_reply(MockReply::success("LGTM [REVIEW:1]"));
    agent.push(
        "reviewer",
        MockReply::success("Rejected [REVIEW:2]").with_delay(Duration::from_millis(20)),
    );
    let (sink, buf) = common::capture_sink();
    let (runner, lifecycle) = runner(dir.path(), &agent, sink, Duration::from_millis(50));

    lifecycle.add_task(TaskSpec::new("first task")).await.unwrap();
    lifecycle.add_task(TaskSpec::new("second task")).await.unwrap();

    let summary = runner.run_pending(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.total(), 2);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let tasks = lifecycle.list().await.unwrap();
    let failed = tasks.iter().find(|t| t.status == TaskStatus::Failed).unwrap();
    let failure = failed.failure.as_ref().unwrap();
    assert_eq!(failure.movement.as_deref(), Some("review"));
    assert!(failure.error.contains("aborted: rejected"));
    assert!(tasks.iter().any(|t| t.status == TaskStatus::Completed));

    let output = common::captured(&buf);
    for line in output.lines().filter(|l| !l.is_empty()) {
        assert!(
            line.starts_with("[first-task] ") || line.starts_with("[second-task] "),
            "unprefixed line: {line:?}"
        );
    }
    assert!(output.contains("=== implement (1/30) ==="));
}

#[tokio::test]
async fn test_run_pending_with_empty_queue() {
    let dir = common::temp_dir();
    let agent = MockAgent::new();
    let (sink, _) = common::capture_sink();
    let (runner, _) = runner(dir.path(), &agent, sink, Duration::from_millis(50));

    let summary = runner.run_pending(CancellationToken::new()).await.unwrap();
    assert_eq!(summary.total(), 0);
    assert!(agent.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_marks_running_task_for_recovery() {
    let dir = common::temp_dir();
    let agent = MockAgent::with_default_reply(
        MockReply::success("slow [REVIEW:1]").with_delay(Duration::from_secs(30)),
    );
    let (sink, _) = common::capture_sink();
    let (runner, lifecycle) = runner(dir.path(), &agent, sink, Duration::from_millis(50));
    lifecycle.add_task(TaskSpec::new("long job")).await.unwrap();

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        stopper.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(10), runner.run_pending(cancel))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.interrupted, 1);

    let task = lifecycle.get("long-job").await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.owner_pid, None);
    assert_eq!(lifecycle.recover_interrupted_running_tasks().await.unwrap(), 1);
}

#[tokio::test]
async fn test_watch_picks_up_tasks_added_later() {
    let dir = common::temp_dir();
    let agent = MockAgent::with_default_reply(MockReply::success("LGTM [REVIEW:1]"));
    let (sink, _) = common::capture_sink();
    let (runner, lifecycle) = runner(dir.path(), &agent, sink, Duration::from_millis(20));

    let cancel = CancellationToken::new();
    let watcher = {
        let runner = runner.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.watch(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    lifecycle.add_task(TaskSpec::new("late arrival")).await.unwrap();

    let done = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let task = lifecycle.get("late-arrival").await.unwrap();
            if task.status == TaskStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(done.is_ok(), "watch never ran the task");

    cancel.cancel();
    let summary = watcher.await.unwrap().unwrap();
    assert_eq!(summary.completed, 1);
}
