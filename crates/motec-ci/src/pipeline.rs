//! Fail-fast execution of a planned run.

use crate::concurrency::CancelToken;
use crate::config::RunnerConfig;
use crate::error::{CiError, Result};
use crate::events::CiEvent;
use crate::ledger::{RunId, RunLedger, RunStatus};
use crate::retry::RetryPolicy;
use crate::runner::{Invocation, StepExecutor, StepOutput, StepResult};
use crate::step::{StepConfig, StepKind};
use crate::trigger::{Trigger, TriggerEvent};
use crate::workflow::RunPlan;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Exit code reported for a cancelled run.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub workflow: String,
    pub group: Option<String>,
    pub trigger: Trigger,

    /// Identity digest of the run.
    pub identity: String,

    pub status: RunStatus,

    /// 0 on success, the first failing step's code on failure, 130 when cancelled.
    pub exit_code: i32,

    /// Results of the steps that executed, in order.
    pub steps: Vec<StepResult>,

    /// Names of steps that did not execute.
    pub skipped: Vec<String>,

    pub duration_ms: u64,

    /// Working directory, when kept after the run.
    pub workdir: Option<PathBuf>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.passed()).count()
    }

    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.passed())
    }

    /// Pretty JSON report of the run.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Code for the process to exit with.
    pub fn process_exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Success => 0,
            RunStatus::Cancelled => CANCELLED_EXIT_CODE,
            _ if (1..=255).contains(&self.exit_code) => self.exit_code,
            _ => 1,
        }
    }
}

/// State that earlier steps hand to later ones.
#[derive(Debug, Default)]
struct RunScope {
    /// Highest-precedence variables, e.g. `CARGO_TARGET_DIR` from the cache step.
    env: BTreeMap<String, String>,
    toolchain: Option<String>,
}

/// Dependency cache key: sha256 over the toolchain and the lockfile contents.
pub fn cache_key(toolchain: &str, lockfile: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(toolchain.as_bytes());
    hasher.update(b"\0");
    hasher.update(lockfile);
    hex::encode(hasher.finalize())
}

/// Ref to fetch so that the trigger's commit is at its tip.
fn fetch_ref(trigger: &Trigger) -> String {
    match (&trigger.event, &trigger.head_ref) {
        (TriggerEvent::PullRequest, Some(head)) if !head.starts_with("refs/") => {
            format!("refs/heads/{}", head)
        }
        (TriggerEvent::PullRequest, Some(head)) => head.clone(),
        _ => trigger.git_ref.clone(),
    }
}

/// URL git can shallow-fetch from; local paths become `file://` URLs.
fn source_url(source: &Path) -> Result<String> {
    let text = source.to_string_lossy();
    if text.contains("://") || text.starts_with("git@") {
        return Ok(text.into_owned());
    }
    let path = std::fs::canonicalize(source)?;
    Ok(format!("file://{}", path.display()))
}

struct Command {
    program: &'static str,
    args: Vec<String>,
    retried: bool,
}

impl Command {
    fn new<I, S>(program: &'static str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            retried: false,
        }
    }

    fn retried(mut self) -> Self {
        self.retried = true;
        self
    }
}

/// Executes the steps of a run in order, halting at the first failure.
pub struct Pipeline {
    ledger: Arc<dyn RunLedger>,
    executor: Arc<dyn StepExecutor>,
    config: RunnerConfig,
}

impl Pipeline {
    pub fn new(
        ledger: Arc<dyn RunLedger>,
        executor: Arc<dyn StepExecutor>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            ledger,
            executor,
            config,
        }
    }

    /// Run `plan` in `workdir` as the already-queued run `run_id`.
    ///
    /// Every step produces `StepStarted` and `StepFinished`, or `StepSkipped`
    /// when it is disabled or an earlier step failed or the run was cancelled.
    pub async fn execute(
        &self,
        run_id: &RunId,
        plan: &RunPlan,
        identity: &str,
        workdir: &Path,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        self.ledger.start_run(run_id).await?;
        info!(
            run_id = %run_id,
            workflow = %plan.workflow,
            event = %plan.trigger.event,
            sha = %plan.trigger.sha,
            "Starting run"
        );

        let mut scope = RunScope::default();
        let mut results = Vec::new();
        let mut skipped = Vec::new();
        let mut failure: Option<(String, i32)> = None;
        let mut cancelled = false;

        for step in &plan.steps {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
            }
            let skip_reason = if cancelled {
                Some("run cancelled".to_string())
            } else if let Some((failed, _)) = &failure {
                Some(format!("step '{}' failed", failed))
            } else if !step.enabled {
                Some("disabled".to_string())
            } else {
                None
            };
            if let Some(reason) = skip_reason {
                info!(run_id = %run_id, step = %step.name, reason = %reason, "Skipping step");
                self.ledger
                    .append_event(
                        run_id,
                        CiEvent::StepSkipped {
                            step: step.name.clone(),
                            reason,
                        },
                    )
                    .await?;
                skipped.push(step.name.clone());
                continue;
            }

            let category = step.kind.category();
            info!(run_id = %run_id, step = %step.name, category = %category, "Executing step");
            self.ledger
                .append_event(
                    run_id,
                    CiEvent::StepStarted {
                        step: step.name.clone(),
                        category,
                    },
                )
                .await?;

            let step_start = Instant::now();
            let result = match self
                .run_step(run_id, plan, step, workdir, &mut scope, cancel)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    // Spawn errors, timeouts and cancellation carry no exit status.
                    if matches!(e, CiError::Cancelled) {
                        cancelled = true;
                    }
                    StepResult {
                        step_name: step.name.clone(),
                        category,
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: e.to_string(),
                        attempts: 1,
                        duration_ms: step_start.elapsed().as_millis() as u64,
                    }
                }
            };

            self.ledger
                .append_event(
                    run_id,
                    CiEvent::StepFinished {
                        step: step.name.clone(),
                        category,
                        exit_code: result.exit_code,
                        passed: result.passed(),
                        attempts: result.attempts,
                        duration_ms: result.duration_ms,
                    },
                )
                .await?;

            if result.passed() {
                info!(
                    run_id = %run_id,
                    step = %step.name,
                    duration_ms = result.duration_ms,
                    "Step passed"
                );
            } else if cancelled {
                info!(run_id = %run_id, step = %step.name, "Step cancelled");
            } else {
                warn!(
                    run_id = %run_id,
                    step = %step.name,
                    category = %category,
                    exit_code = result.exit_code,
                    output = %result.output_tail(20),
                    "Step failed"
                );
                failure = Some((step.name.clone(), result.exit_code));
            }
            results.push(result);
        }

        let (status, exit_code) = if cancelled {
            (RunStatus::Cancelled, CANCELLED_EXIT_CODE)
        } else if let Some((_, code)) = failure {
            (RunStatus::Failure, code)
        } else {
            (RunStatus::Success, 0)
        };
        self.ledger.finish_run(run_id, status, exit_code).await?;
        info!(run_id = %run_id, status = %status, exit_code, "Run finished");

        Ok(RunOutcome {
            run_id: run_id.clone(),
            workflow: plan.workflow.clone(),
            group: plan.group.clone(),
            trigger: plan.trigger.clone(),
            identity: identity.to_string(),
            status,
            exit_code,
            steps: results,
            skipped,
            duration_ms: start.elapsed().as_millis() as u64,
            workdir: None,
        })
    }

    /// Translate a step into commands and run them in order.
    async fn run_step(
        &self,
        run_id: &RunId,
        plan: &RunPlan,
        step: &StepConfig,
        workdir: &Path,
        scope: &mut RunScope,
        cancel: &CancelToken,
    ) -> Result<StepResult> {
        let commands = match &step.kind {
            StepKind::Checkout {
                git_ref,
                fetch_depth,
            } => {
                let target = git_ref.clone().unwrap_or_else(|| plan.trigger.sha.clone());
                vec![
                    Command::new("git", ["init", "-q", "."]),
                    Command::new(
                        "git",
                        [
                            "fetch".to_string(),
                            "--no-tags".to_string(),
                            "--depth".to_string(),
                            fetch_depth.to_string(),
                            source_url(&self.config.source)?,
                            fetch_ref(&plan.trigger),
                        ],
                    ),
                    Command::new(
                        "git",
                        [
                            "-c".to_string(),
                            "advice.detachedHead=false".to_string(),
                            "checkout".to_string(),
                            "-q".to_string(),
                            "--detach".to_string(),
                            target,
                        ],
                    ),
                ]
            }
            StepKind::ToolchainInstall {
                toolchain,
                profile,
                override_default,
            } => {
                scope.toolchain = Some(toolchain.clone());
                if *override_default {
                    // Run-scoped; rustup's own override table is left untouched.
                    scope
                        .env
                        .insert("RUSTUP_TOOLCHAIN".to_string(), toolchain.clone());
                }
                vec![Command::new(
                    "rustup",
                    [
                        "toolchain",
                        "install",
                        toolchain.as_str(),
                        "--profile",
                        profile.as_str(),
                        "--no-self-update",
                    ],
                )
                .retried()]
            }
            StepKind::DependencyCache => {
                let lockfile = match tokio::fs::read(workdir.join("Cargo.lock")).await {
                    Ok(bytes) => bytes,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                    Err(e) => return Err(e.into()),
                };
                let toolchain = scope.toolchain.as_deref().unwrap_or("stable");
                let key = cache_key(toolchain, &lockfile);
                let target_dir = self.config.cache_dir.join(&key[..16]);
                let hit = tokio::fs::try_exists(&target_dir).await.unwrap_or(false);
                tokio::fs::create_dir_all(&target_dir).await?;
                info!(
                    run_id = %run_id,
                    key = %key,
                    hit,
                    target_dir = %target_dir.display(),
                    "Dependency cache"
                );
                scope.env.insert(
                    "CARGO_TARGET_DIR".to_string(),
                    target_dir.to_string_lossy().into_owned(),
                );
                vec![Command::new("cargo", ["fetch"]).retried()]
            }
            StepKind::Cargo { command, args } => vec![Command::new(
                "cargo",
                std::iter::once(command.clone()).chain(args.iter().cloned()),
            )],
            StepKind::Shell { script } => {
                vec![Command::new("sh", ["-e", "-c", script.as_str()])]
            }
        };

        // process <- workflow/job <- step <- run scope
        let mut env = plan.env.clone();
        env.extend(step.env.clone());
        env.extend(scope.env.clone());
        let timeout_secs = if step.timeout_secs > 0 {
            step.timeout_secs
        } else {
            self.config.step_timeout_secs
        };

        let start = Instant::now();
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut attempts = 1;
        let mut exit_code = 0;

        for command in commands {
            let invocation = Invocation {
                program: command.program.to_string(),
                args: command.args,
                cwd: workdir.to_path_buf(),
                env: env.clone(),
                timeout_secs,
            };
            let policy = if command.retried {
                step.retry
            } else {
                RetryPolicy::none()
            };

            let (output, tries) = self
                .run_with_retry(run_id, &step.name, &invocation, policy, cancel)
                .await?;
            stdout.push_str(&output.stdout);
            stderr.push_str(&output.stderr);
            attempts = attempts.max(tries);
            exit_code = output.exit_code;
            if exit_code != 0 {
                break;
            }
        }

        Ok(StepResult {
            step_name: step.name.clone(),
            category: step.kind.category(),
            exit_code,
            stdout,
            stderr,
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn run_with_retry(
        &self,
        run_id: &RunId,
        step: &str,
        invocation: &Invocation,
        policy: RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<(StepOutput, u32)> {
        let mut attempt = 1;
        loop {
            debug!(
                run_id = %run_id,
                step = %step,
                attempt,
                command = %invocation.command_line(),
                "Running command"
            );
            let output = self.executor.execute(invocation, cancel).await?;
            if output.exit_code == 0 || attempt >= policy.max_attempts() {
                return Ok((output, attempt));
            }

            let delay = policy.delay_after(attempt);
            warn!(
                run_id = %run_id,
                step = %step,
                attempt,
                exit_code = output.exit_code,
                delay_ms = delay.as_millis() as u64,
                "Command failed, retrying"
            );
            self.ledger
                .append_event(
                    run_id,
                    CiEvent::StepRetried {
                        step: step.to_string(),
                        attempt,
                        exit_code: output.exit_code,
                        delay_ms: delay.as_millis() as u64,
                    },
                )
                .await?;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(CiError::Cancelled),
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryRunLedger, RunMetadata};
    use crate::step::StepCategory;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted exit codes and records every invocation.
    #[derive(Default)]
    struct ScriptedExecutor {
        codes: Mutex<Vec<i32>>,
        calls: Mutex<Vec<Invocation>>,
    }

    impl ScriptedExecutor {
        fn with_codes(codes: &[i32]) -> Self {
            let mut codes = codes.to_vec();
            codes.reverse();
            Self {
                codes: Mutex::new(codes),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            invocation: &Invocation,
            _cancel: &CancelToken,
        ) -> Result<StepOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            let exit_code = self.codes.lock().unwrap().pop().unwrap_or(0);
            Ok(StepOutput {
                exit_code,
                ..Default::default()
            })
        }
    }

    fn plan(steps: Vec<StepConfig>) -> RunPlan {
        RunPlan {
            workflow: "CI".to_string(),
            job: "test".to_string(),
            trigger: Trigger::push("refs/heads/main", "abc"),
            group: None,
            cancel_in_progress: false,
            env: BTreeMap::from([("CARGO_INCREMENTAL".to_string(), "0".to_string())]),
            steps,
        }
    }

    async fn run(
        executor: Arc<ScriptedExecutor>,
        plan: &RunPlan,
        config: RunnerConfig,
    ) -> (RunOutcome, Arc<MemoryRunLedger>) {
        let ledger = Arc::new(MemoryRunLedger::new());
        let run_id = ledger
            .create_run(RunMetadata {
                workflow: plan.workflow.clone(),
                group: None,
                trigger: plan.trigger.clone(),
                identity: "id".to_string(),
            })
            .await
            .unwrap();
        let workdir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(ledger.clone(), executor, config);
        let outcome = pipeline
            .execute(&run_id, plan, "id", workdir.path(), &CancelToken::never())
            .await
            .unwrap();
        (outcome, ledger)
    }

    fn cargo(command: &str, args: &str) -> StepConfig {
        StepConfig::new(
            format!("cargo {}", command),
            StepKind::Cargo {
                command: command.to_string(),
                args: args.split_whitespace().map(str::to_string).collect(),
            },
        )
    }

    #[test]
    fn test_cache_key() {
        let a = cache_key("stable", b"lock-v1");
        assert_eq!(a, cache_key("stable", b"lock-v1"));
        assert_ne!(a, cache_key("nightly", b"lock-v1"));
        assert_ne!(a, cache_key("stable", b"lock-v2"));
    }

    #[test]
    fn test_fetch_ref() {
        assert_eq!(
            fetch_ref(&Trigger::push("refs/heads/main", "a")),
            "refs/heads/main"
        );
        assert_eq!(
            fetch_ref(&Trigger::pull_request("refs/pull/1/merge", "feature", "b")),
            "refs/heads/feature"
        );
    }

    #[test]
    fn test_source_url() {
        assert_eq!(
            source_url(Path::new("https://example.com/r.git")).unwrap(),
            "https://example.com/r.git"
        );
        let dir = tempfile::tempdir().unwrap();
        assert!(source_url(dir.path()).unwrap().starts_with("file:///"));
    }

    #[tokio::test]
    async fn test_success_and_env() {
        let executor = Arc::new(ScriptedExecutor::default());
        let plan = plan(vec![
            cargo("test", "--workspace --all-targets"),
            cargo("run", "--example read").with_env("RUST_LOG", "debug"),
        ]);
        let (outcome, _) = run(executor.clone(), &plan, RunnerConfig::default()).await;

        assert!(outcome.success());
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.passed_count(), 2);

        let calls = executor.calls();
        assert_eq!(calls[0].args, vec!["test", "--workspace", "--all-targets"]);
        assert!(calls.iter().all(|c| c.env["CARGO_INCREMENTAL"] == "0"));
        assert_eq!(calls[1].env["RUST_LOG"], "debug");
        assert_eq!(outcome.steps[1].category, StepCategory::Example);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_rest() {
        let executor = Arc::new(ScriptedExecutor::with_codes(&[0, 101]));
        let plan = plan(vec![
            StepConfig::shell("first", "true"),
            cargo("test", ""),
            cargo("run", "--example read"),
            cargo("run", "--example write"),
        ]);
        let (outcome, ledger) = run(executor.clone(), &plan, RunnerConfig::default()).await;

        assert_eq!(outcome.status, RunStatus::Failure);
        assert_eq!(outcome.exit_code, 101);
        assert_eq!(outcome.process_exit_code(), 101);
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.skipped, vec!["cargo run", "cargo run"]);
        assert_eq!(executor.calls().len(), 2);

        let events = ledger.get_events(&outcome.run_id).await.unwrap();
        let skipped = events
            .iter()
            .filter(|e| matches!(e.event, CiEvent::StepSkipped { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[tokio::test]
    async fn test_disabled_step_skipped() {
        let executor = Arc::new(ScriptedExecutor::default());
        let plan = plan(vec![
            StepConfig::shell("off", "false").disabled(),
            StepConfig::shell("on", "true"),
        ]);
        let (outcome, _) = run(executor.clone(), &plan, RunnerConfig::default()).await;
        assert!(outcome.success());
        assert_eq!(outcome.skipped, vec!["off"]);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_network_step_retries_then_succeeds() {
        let executor = Arc::new(ScriptedExecutor::with_codes(&[1, 1, 0]));
        let step = StepConfig::new(
            "toolchain",
            StepKind::ToolchainInstall {
                toolchain: "stable".to_string(),
                profile: "minimal".to_string(),
                override_default: false,
            },
        )
        .with_retry(RetryPolicy::new(10, 1, 2));
        let (outcome, ledger) =
            run(executor.clone(), &plan(vec![step]), RunnerConfig::default()).await;

        assert!(outcome.success());
        assert_eq!(outcome.steps[0].attempts, 3);
        let calls = executor.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.program == "rustup"));

        let retries = ledger
            .get_events(&outcome.run_id)
            .await
            .unwrap()
            .iter()
            .filter(|e| matches!(e.event, CiEvent::StepRetried { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_network_step_exhausts_retries() {
        let executor = Arc::new(ScriptedExecutor::with_codes(&[1, 1, 1]));
        let step = StepConfig::new(
            "toolchain",
            StepKind::ToolchainInstall {
                toolchain: "stable".to_string(),
                profile: "minimal".to_string(),
                override_default: false,
            },
        )
        .with_retry(RetryPolicy::new(2, 1, 1));
        let (outcome, _) = run(executor, &plan(vec![step]), RunnerConfig::default()).await;
        assert_eq!(outcome.status, RunStatus::Failure);
        assert_eq!(outcome.steps[0].attempts, 3);
        assert_eq!(outcome.steps[0].category, StepCategory::Toolchain);
    }

    #[tokio::test]
    async fn test_non_network_step_not_retried() {
        let executor = Arc::new(ScriptedExecutor::with_codes(&[1]));
        let step = cargo("test", "").with_retry(RetryPolicy::new(5, 1, 1));
        let (outcome, _) = run(executor.clone(), &plan(vec![step]), RunnerConfig::default()).await;
        assert_eq!(outcome.status, RunStatus::Failure);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_step_sets_target_dir_for_later_steps() {
        let cache = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::default());
        let plan = plan(vec![
            StepConfig::new("cache", StepKind::DependencyCache),
            cargo("test", ""),
        ]);
        let config = RunnerConfig::default().with_cache_dir(cache.path());
        let (outcome, _) = run(executor.clone(), &plan, config).await;
        assert!(outcome.success());

        let calls = executor.calls();
        assert_eq!(calls[0].args, vec!["fetch"]);
        let target = &calls[1].env["CARGO_TARGET_DIR"];
        assert!(target.starts_with(&*cache.path().to_string_lossy()));
        assert!(Path::new(target).is_dir());
        assert_eq!(&calls[0].env["CARGO_TARGET_DIR"], target);
    }

    #[tokio::test]
    async fn test_toolchain_override_is_scoped_to_the_run() {
        let executor = Arc::new(ScriptedExecutor::default());
        let plan = plan(vec![
            StepConfig::new(
                "toolchain",
                StepKind::ToolchainInstall {
                    toolchain: "stable".to_string(),
                    profile: "minimal".to_string(),
                    override_default: true,
                },
            ),
            cargo("test", ""),
        ]);
        let (outcome, _) = run(executor.clone(), &plan, RunnerConfig::default()).await;
        assert!(outcome.success());

        let calls = executor.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.args.first().map(String::as_str) != Some("override")));
        assert_eq!(calls[1].program, "cargo");
        assert_eq!(calls[1].env["RUSTUP_TOOLCHAIN"], "stable");
    }

    #[tokio::test]
    async fn test_toolchain_without_override_leaves_selection_alone() {
        let executor = Arc::new(ScriptedExecutor::default());
        let plan = plan(vec![
            StepConfig::new(
                "toolchain",
                StepKind::ToolchainInstall {
                    toolchain: "stable".to_string(),
                    profile: "minimal".to_string(),
                    override_default: false,
                },
            ),
            cargo("test", ""),
        ]);
        let (outcome, _) = run(executor.clone(), &plan, RunnerConfig::default()).await;
        assert!(outcome.success());
        assert!(!executor.calls()[1].env.contains_key("RUSTUP_TOOLCHAIN"));
    }

    #[test]
    fn test_process_exit_code() {
        let outcome = RunOutcome {
            run_id: RunId::new(),
            workflow: "CI".to_string(),
            group: None,
            trigger: Trigger::push("refs/heads/main", "abc"),
            identity: String::new(),
            status: RunStatus::Failure,
            exit_code: -1,
            steps: vec![],
            skipped: vec![],
            duration_ms: 0,
            workdir: None,
        };
        assert_eq!(outcome.process_exit_code(), 1);
        let report: serde_json::Value = serde_json::from_str(&outcome.to_json().unwrap()).unwrap();
        assert_eq!(report["status"], "failure");
        assert_eq!(report["exit_code"], -1);
        let cancelled = RunOutcome {
            status: RunStatus::Cancelled,
            ..outcome
        };
        assert_eq!(cancelled.process_exit_code(), 130);
    }
}
