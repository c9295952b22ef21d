//! Workflow files in GitHub Actions syntax and the run plans derived from them.

use crate::error::{CiError, Result};
use crate::expr;
use crate::retry::RetryPolicy;
use crate::step::{StepConfig, StepKind};
use crate::trigger::Trigger;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Default location of the workflow inside a repository.
pub const DEFAULT_WORKFLOW_PATH: &str = ".github/workflows/ci.yml";

pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// `on:` accepts a single event, a list, or a map keyed by event.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Triggers {
    One(String),
    Many(Vec<String>),
    Detailed(BTreeMap<String, Value>),
}

impl Triggers {
    pub fn events(&self) -> Vec<String> {
        match self {
            Triggers::One(event) => vec![event.clone()],
            Triggers::Many(events) => events.clone(),
            Triggers::Detailed(map) => map.keys().cloned().collect(),
        }
    }
}

/// `concurrency:` is either a bare group name or a group with options.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Concurrency {
    Group(String),
    Detailed {
        group: String,
        #[serde(rename = "cancel-in-progress", default)]
        cancel_in_progress: Option<Value>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    pub name: Option<String>,
    pub uses: Option<String>,
    pub run: Option<String>,
    #[serde(default)]
    pub with: BTreeMap<String, Value>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,
}

impl WorkflowStep {
    /// Display name: explicit `name:`, else the action or the first script line.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (&self.uses, &self.run) {
            (Some(uses), _) => uses.clone(),
            (None, Some(run)) => format!("Run {}", run.lines().next().unwrap_or("").trim()),
            (None, None) => "unnamed step".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub name: Option<String>,
    #[serde(rename = "runs-on")]
    pub runs_on: Option<Value>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    #[serde(rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    pub name: Option<String>,
    pub on: Triggers,
    pub concurrency: Option<Concurrency>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
    pub jobs: BTreeMap<String, Job>,
}

/// Everything needed to execute one job for one trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPlan {
    pub workflow: String,
    pub job: String,
    pub trigger: Trigger,

    /// Resolved concurrency group, if the workflow declares one.
    pub group: Option<String>,
    pub cancel_in_progress: bool,

    /// Workflow and job environment, resolved.
    pub env: BTreeMap<String, String>,
    pub steps: Vec<StepConfig>,
}

impl RunPlan {
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    /// Replace the backoff of every retrying step.
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        for step in &mut self.steps {
            if step.retry.max_retries > 0 {
                step.retry = RetryPolicy::new(step.retry.max_retries, base_ms, max_ms);
            }
        }
        self
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn resolve_map(
    map: &BTreeMap<String, Value>,
    ctx: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expr::substitute(&value_to_string(v), ctx)))
        .collect()
}

impl Workflow {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(text)?;
        if workflow.jobs.is_empty() {
            return Err(CiError::InvalidWorkflow("workflow has no jobs".to_string()));
        }
        Ok(workflow)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    pub fn handles(&self, trigger: &Trigger) -> bool {
        self.on.events().iter().any(|e| e == trigger.event.name())
    }

    /// Check that every job maps onto known step kinds.
    pub fn validate(&self) -> Result<()> {
        let push = Trigger::push("refs/heads/main", "0000000000000000000000000000000000000000");
        for job in self.jobs.keys() {
            self.plan_job(&push, job)?;
        }
        Ok(())
    }

    /// Plan the only job of the workflow for `trigger`.
    pub fn plan(&self, trigger: &Trigger) -> Result<RunPlan> {
        let mut jobs = self.jobs.keys();
        match (jobs.next(), jobs.next()) {
            (Some(job), None) => self.plan_job(trigger, job),
            _ => Err(CiError::InvalidWorkflow(format!(
                "workflow '{}' has {} jobs; select one",
                self.name(),
                self.jobs.len()
            ))),
        }
    }

    pub fn plan_job(&self, trigger: &Trigger, job_id: &str) -> Result<RunPlan> {
        if !self.handles(trigger) {
            return Err(CiError::TriggerNotHandled {
                workflow: self.name().to_string(),
                event: trigger.event.to_string(),
            });
        }
        let job = self
            .jobs
            .get(job_id)
            .ok_or_else(|| CiError::InvalidWorkflow(format!("no job named '{}'", job_id)))?;

        let ctx = trigger.context(self.name());

        let (group, cancel_in_progress) = match &self.concurrency {
            None => (None, false),
            Some(Concurrency::Group(group)) => (Some(expr::substitute(group, &ctx)), false),
            Some(Concurrency::Detailed {
                group,
                cancel_in_progress,
            }) => {
                let cancel = cancel_in_progress
                    .as_ref()
                    .map(|v| expr::substitute(&value_to_string(v), &ctx).trim() == "true")
                    .unwrap_or(false);
                (Some(expr::substitute(group, &ctx)), cancel)
            }
        };

        let mut env = resolve_map(&self.env, &ctx);
        env.extend(resolve_map(&job.env, &ctx));

        let mut steps = Vec::with_capacity(job.steps.len());
        for step in &job.steps {
            let name = step.display_name();
            let kind = match (&step.uses, &step.run) {
                (Some(uses), None) => {
                    StepKind::from_action(&name, uses, &resolve_map(&step.with, &ctx))?
                }
                (None, Some(run)) => StepKind::Shell {
                    script: expr::substitute(run, &ctx),
                },
                _ => {
                    return Err(CiError::InvalidWorkflow(format!(
                        "step '{}' must have exactly one of 'uses' or 'run'",
                        name
                    )))
                }
            };

            let step_env = resolve_map(&step.env, &ctx);
            let retry = match kind.retry_env_var() {
                Some(var) => {
                    let retries = step_env
                        .get(var)
                        .or_else(|| env.get(var))
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(0);
                    RetryPolicy::new(retries, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS)
                }
                None => RetryPolicy::none(),
            };

            let mut config = StepConfig::new(name, kind).with_retry(retry);
            if let Some(minutes) = step.timeout_minutes.or(job.timeout_minutes) {
                let secs = minutes.checked_mul(60).ok_or_else(|| {
                    CiError::InvalidWorkflow(format!(
                        "step '{}': timeout-minutes {} is out of range",
                        config.name, minutes
                    ))
                })?;
                config = config.with_timeout(secs);
            }
            config.env = step_env;
            steps.push(config);
        }

        Ok(RunPlan {
            workflow: self.name().to_string(),
            job: job_id.to_string(),
            trigger: trigger.clone(),
            group,
            cancel_in_progress,
            env,
            steps,
        })
    }
}
