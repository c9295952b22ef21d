//! Integration tests running real processes through the orchestrator.

use motec_ci::{
    CiEvent, Orchestrator, RunGate, RunStatus, RunnerConfig, StepCategory, Trigger, Workflow,
};
use std::path::Path;
use std::process::Command;

fn workflow(steps: &str) -> Workflow {
    let yaml = format!(
        concat!(
            "name: CI\n",
            "on: [push, pull_request]\n",
            "env:\n",
            "  CARGO_INCREMENTAL: 0\n",
            "  CI: 1\n",
            "jobs:\n",
            "  test:\n",
            "    runs-on: ubuntu-latest\n",
            "    steps:\n",
            "{}",
        ),
        steps
    );
    Workflow::from_yaml(&yaml).expect("workflow should parse")
}

fn orchestrator() -> Orchestrator {
    Orchestrator::new(RunnerConfig::default().with_backoff(1, 2))
}

fn push() -> Trigger {
    Trigger::push("refs/heads/main", "abc123")
}

/// Test: all steps pass
#[tokio::test]
async fn test_successful_run() {
    let workflow = workflow(
        concat!(
            "      - name: hello\n",
            "        run: echo hello\n",
            "      - name: world\n",
            "        run: echo world\n",
        ),
    );
    let orchestrator = orchestrator();
    let outcome = orchestrator.trigger(&workflow, push()).await.expect("run failed");

    assert!(outcome.success(), "Run should succeed");
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.passed_count(), 2);
    assert!(outcome.steps[0].stdout.contains("hello"));

    let events = orchestrator
        .ledger()
        .get_events(&outcome.run_id)
        .await
        .expect("events");
    // queued, started, 2 x (step started + finished), finished
    assert_eq!(events.len(), 7);
    assert!(RunGate::evaluate(&events).passed);
}

/// Test: the first failing step halts the run and its exit code propagates
#[tokio::test]
async fn test_fail_fast_exit_code() {
    let workflow = workflow(
        concat!(
            "      - name: ok\n",
            "        run: 'true'\n",
            "      - name: tests\n",
            "        run: echo 'test parse_header ... FAILED'; exit 7\n",
            "      - name: never\n",
            "        run: touch should-not-exist\n",
        ),
    );
    let orchestrator = orchestrator();
    let outcome = orchestrator.trigger(&workflow, push()).await.expect("run failed");

    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.exit_code, 7);
    assert_eq!(outcome.process_exit_code(), 7);
    assert_eq!(outcome.skipped, vec!["never"]);

    let failed = outcome.failed_step().expect("a failed step");
    assert_eq!(failed.step_name, "tests");
    assert!(failed.stdout.contains("parse_header ... FAILED"));

    let events = orchestrator
        .ledger()
        .get_events(&outcome.run_id)
        .await
        .expect("events");
    let started: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.event {
            CiEvent::StepStarted { step, .. } => Some(step.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["ok", "tests"]);

    let verdict = RunGate::evaluate(&events);
    assert!(!verdict.passed);
    assert_eq!(verdict.violations.len(), 1);
}

/// Test: the workflow environment reaches every step
#[tokio::test]
async fn test_env_in_every_step() {
    let workflow = workflow(
        concat!(
            "      - run: test \"$CARGO_INCREMENTAL\" = 0\n",
            "      - run: test \"$CI\" = 1\n",
            "      - env:\n",
            "          CARGO_INCREMENTAL: 1\n",
            "        run: test \"$CARGO_INCREMENTAL\" = 1\n",
        ),
    );
    let outcome = orchestrator().trigger(&workflow, push()).await.expect("run failed");
    assert!(outcome.success(), "{:?}", outcome.failed_step());
}

/// Test: expressions resolve against the trigger
#[tokio::test]
async fn test_trigger_context_in_scripts() {
    let workflow = workflow(
        concat!(
            "      - run: test \"${{ github.event_name }}\" = pull_request\n",
            "      - run: test \"${{ github.event.pull_request.head.sha }}\" = f00d\n",
        ),
    );
    let outcome = orchestrator()
        .trigger(
            &workflow,
            Trigger::pull_request("refs/pull/9/merge", "feature", "f00d"),
        )
        .await
        .expect("run failed");
    assert!(outcome.success(), "{:?}", outcome.failed_step());
}

/// Test: same commit, same identity and result
#[tokio::test]
async fn test_identical_commit_is_deterministic() {
    let workflow = workflow("      - run: 'true'\n");
    let orchestrator = orchestrator();
    let first = orchestrator.trigger(&workflow, push()).await.unwrap();
    let second = orchestrator.trigger(&workflow, push()).await.unwrap();
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.identity, second.identity);
    assert_eq!(first.status, second.status);
}

/// Test: a step that cannot finish in time fails with -1 and exit 1
#[tokio::test]
async fn test_step_timeout() {
    let orchestrator = Orchestrator::new(RunnerConfig {
        step_timeout_secs: 1,
        ..RunnerConfig::default()
    });
    let workflow = workflow("      - run: sleep 10\n");
    let outcome = orchestrator.trigger(&workflow, push()).await.unwrap();
    assert_eq!(outcome.status, RunStatus::Failure);
    assert_eq!(outcome.exit_code, -1);
    assert_eq!(outcome.process_exit_code(), 1);
    assert!(outcome.steps[0].stderr.contains("timed out"));
}

/// Test: working directory kept on request
#[tokio::test]
async fn test_keep_workdir() {
    let root = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(RunnerConfig {
        keep_workdir: true,
        ..RunnerConfig::default().with_work_root(root.path())
    });
    let workflow = workflow("      - run: echo kept > marker\n");
    let outcome = orchestrator.trigger(&workflow, push()).await.unwrap();
    let workdir = outcome.workdir.expect("workdir kept");
    assert!(workdir.starts_with(root.path()));
    assert!(workdir.join("marker").exists());
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=ci", "-c", "user.email=ci@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should run");
    assert!(output.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Source repository with `commits` empty commits on `main`.
fn source_repo(commits: usize) -> (tempfile::TempDir, Vec<String>) {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    let mut shas = Vec::new();
    for i in 0..commits {
        git(
            dir.path(),
            &["commit", "-q", "--allow-empty", "-m", &format!("commit {}", i)],
        );
        shas.push(git(dir.path(), &["rev-parse", "HEAD"]));
    }
    (dir, shas)
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

const CHECKOUT_STEPS: &str = concat!(
    "      - uses: actions/checkout@v4\n",
    "        with:\n",
    "          ref: ${{ github.event.pull_request.head.sha }}\n",
    "          fetch-depth: 20\n",
    "      - name: inspect\n",
    "        run: git rev-list --count HEAD > @OUT@/count; git rev-parse HEAD > @OUT@/head\n",
);

/// Test: checkout fetches 20 commits and lands on the pull request head
#[tokio::test]
async fn test_checkout_depth_and_head() {
    if !git_available() {
        return;
    }
    let (source, shas) = source_repo(25);
    let out = tempfile::tempdir().unwrap();
    let workflow = workflow(&CHECKOUT_STEPS.replace("@OUT@", &out.path().to_string_lossy()));
    let orchestrator = Orchestrator::new(RunnerConfig::default().with_source(source.path()));

    let head = shas.last().unwrap().clone();
    let outcome = orchestrator
        .trigger(
            &workflow,
            Trigger::pull_request("refs/pull/1/merge", "main", head.clone()),
        )
        .await
        .unwrap();
    assert!(outcome.success(), "{:?}", outcome.failed_step());

    let count = std::fs::read_to_string(out.path().join("count")).unwrap();
    assert_eq!(count.trim(), "20");
    let checked_out = std::fs::read_to_string(out.path().join("head")).unwrap();
    assert_eq!(checked_out.trim(), head);
}

/// Test: a commit beyond the fetch depth is a fatal checkout failure
#[tokio::test]
async fn test_checkout_beyond_depth_fails() {
    if !git_available() {
        return;
    }
    let (source, shas) = source_repo(25);
    let out = tempfile::tempdir().unwrap();
    let workflow = workflow(&CHECKOUT_STEPS.replace("@OUT@", &out.path().to_string_lossy()));
    let orchestrator = Orchestrator::new(RunnerConfig::default().with_source(source.path()));

    let outcome = orchestrator
        .trigger(
            &workflow,
            Trigger::pull_request("refs/pull/1/merge", "main", shas[0].clone()),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Failure);
    let failed = outcome.failed_step().unwrap();
    assert_eq!(failed.category, StepCategory::Checkout);
    assert_eq!(outcome.skipped, vec!["inspect"]);
    assert!(!out.path().join("count").exists());
}
