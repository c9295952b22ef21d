//! Trigger handling: plan, admit into the concurrency group, execute.

use crate::concurrency::{Admission, CancelToken, ConcurrencyGroups};
use crate::config::RunnerConfig;
use crate::error::Result;
use crate::events::CiEvent;
use crate::ledger::{MemoryRunLedger, RunLedger, RunMetadata, RunStatus};
use crate::pipeline::{Pipeline, RunOutcome, CANCELLED_EXIT_CODE};
use crate::runner::{ProcessExecutor, StepExecutor};
use crate::spec::RunSpec;
use crate::trigger::Trigger;
use crate::workflow::{RunPlan, Workflow};
use std::sync::Arc;
use tracing::info;

/// Accepts trigger events and runs the matching workflow.
///
/// Clones share the ledger and the concurrency groups, so runs started from
/// different tasks see each other.
#[derive(Clone)]
pub struct Orchestrator {
    config: RunnerConfig,
    ledger: Arc<dyn RunLedger>,
    executor: Arc<dyn StepExecutor>,
    groups: ConcurrencyGroups,
}

impl Orchestrator {
    pub fn new(config: RunnerConfig) -> Self {
        let groups = match &config.lock_dir {
            Some(dir) => ConcurrencyGroups::with_lock_dir(dir),
            None => ConcurrencyGroups::new(),
        };
        Self {
            config,
            ledger: Arc::new(MemoryRunLedger::new()),
            executor: Arc::new(ProcessExecutor),
            groups,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn RunLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn ledger(&self) -> Arc<dyn RunLedger> {
        self.ledger.clone()
    }

    pub fn groups(&self) -> &ConcurrencyGroups {
        &self.groups
    }

    /// Handle `trigger` for `workflow`.
    ///
    /// Events the workflow does not list are rejected before a run exists.
    pub async fn trigger(&self, workflow: &Workflow, trigger: Trigger) -> Result<RunOutcome> {
        let plan = workflow
            .plan(&trigger)?
            .with_backoff(self.config.backoff_base_ms, self.config.backoff_max_ms);
        self.run_plan(plan).await
    }

    pub async fn run_plan(&self, plan: RunPlan) -> Result<RunOutcome> {
        let identity = RunSpec::from_plan(&plan).digest();
        let run_id = self
            .ledger
            .create_run(RunMetadata {
                workflow: plan.workflow.clone(),
                group: plan.group.clone(),
                trigger: plan.trigger.clone(),
                identity: identity.clone(),
            })
            .await?;
        info!(
            run_id = %run_id,
            workflow = %plan.workflow,
            group = plan.group.as_deref().unwrap_or("-"),
            event = %plan.trigger.event,
            "Run queued"
        );

        let permit = match &plan.group {
            Some(group) => match self
                .groups
                .admit(group, &run_id, plan.cancel_in_progress)
                .await?
            {
                Admission::Admitted(permit) => Some(permit),
                Admission::Superseded => {
                    info!(run_id = %run_id, group = %group, "Run superseded before start");
                    for step in &plan.steps {
                        self.ledger
                            .append_event(
                                &run_id,
                                CiEvent::StepSkipped {
                                    step: step.name.clone(),
                                    reason: "run superseded".to_string(),
                                },
                            )
                            .await?;
                    }
                    self.ledger
                        .finish_run(&run_id, RunStatus::Cancelled, CANCELLED_EXIT_CODE)
                        .await?;
                    return Ok(RunOutcome {
                        run_id,
                        workflow: plan.workflow.clone(),
                        group: plan.group.clone(),
                        trigger: plan.trigger.clone(),
                        identity,
                        status: RunStatus::Cancelled,
                        exit_code: CANCELLED_EXIT_CODE,
                        steps: Vec::new(),
                        skipped: plan.step_names(),
                        duration_ms: 0,
                        workdir: None,
                    });
                }
            },
            None => None,
        };
        let token = permit
            .as_ref()
            .map(|p| p.token().clone())
            .unwrap_or_else(CancelToken::never);

        let workdir = match &self.config.work_root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                tempfile::Builder::new()
                    .prefix("motec-ci-run-")
                    .tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix("motec-ci-run-").tempdir()?,
        };

        let pipeline = Pipeline::new(
            self.ledger.clone(),
            self.executor.clone(),
            self.config.clone(),
        );
        let result = pipeline
            .execute(&run_id, &plan, &identity, workdir.path(), &token)
            .await;
        drop(permit);

        let mut outcome = result?;
        if self.config.keep_workdir {
            let kept = workdir.into_path();
            info!(run_id = %run_id, workdir = %kept.display(), "Keeping working directory");
            outcome.workdir = Some(kept);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CiError;

    #[tokio::test]
    async fn test_unhandled_event_creates_no_run() {
        let workflow =
            Workflow::from_yaml("on: [push]\njobs:\n  a:\n    steps:\n      - run: 'true'\n")
                .unwrap();
        let orchestrator = Orchestrator::new(RunnerConfig::default());
        let err = orchestrator
            .trigger(
                &workflow,
                Trigger::pull_request("refs/pull/1/merge", "x", "abc"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CiError::TriggerNotHandled { .. }));
        assert!(orchestrator.ledger().list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shell_run_records_identity() {
        let workflow =
            Workflow::from_yaml("on: push\njobs:\n  a:\n    steps:\n      - run: 'true'\n")
                .unwrap();
        let orchestrator = Orchestrator::new(RunnerConfig::default());
        let outcome = orchestrator
            .trigger(&workflow, Trigger::push("refs/heads/main", "abc"))
            .await
            .unwrap();
        assert!(outcome.success());

        let record = orchestrator.ledger().get_run(&outcome.run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.metadata.identity, outcome.identity);
        assert!(outcome.workdir.is_none());
    }
}
