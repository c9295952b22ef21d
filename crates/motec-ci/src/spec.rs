//! Run identity.

use crate::step::StepKind;
use crate::workflow::RunPlan;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a run evaluates, independent of when or where it executes.
///
/// Two runs over the same commit with the same workflow steps and
/// environment share an identity digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSpec {
    pub workflow: String,
    pub job: String,

    /// Commit under test.
    pub sha: String,

    /// SHA-256 digest of the ordered step definitions.
    pub steps_digest: String,

    /// SHA-256 digest of the sorted workflow environment.
    pub env_digest: String,
}

impl RunSpec {
    pub fn from_plan(plan: &RunPlan) -> Self {
        let steps: Vec<String> = plan
            .steps
            .iter()
            .map(|s| {
                // An unset checkout ref means the trigger commit.
                let kind = match &s.kind {
                    StepKind::Checkout {
                        git_ref: None,
                        fetch_depth,
                    } => StepKind::Checkout {
                        git_ref: Some(plan.trigger.sha.clone()),
                        fetch_depth: *fetch_depth,
                    },
                    other => other.clone(),
                };
                format!("{}\u{1f}{}", s.name, kind.describe())
            })
            .collect();
        let env: Vec<String> = plan
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        Self {
            workflow: plan.workflow.clone(),
            job: plan.job.clone(),
            sha: plan.trigger.sha.clone(),
            steps_digest: digest_lines(&steps),
            env_digest: digest_lines(&env),
        }
    }

    /// Identity digest of the run.
    pub fn digest(&self) -> String {
        digest_lines(&[
            self.workflow.clone(),
            self.job.clone(),
            self.sha.clone(),
            self.steps_digest.clone(),
            self.env_digest.clone(),
        ])
    }
}

fn digest_lines(lines: &[String]) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepConfig;
    use crate::trigger::Trigger;
    use std::collections::BTreeMap;

    fn plan(trigger: Trigger, steps: &[&str]) -> RunPlan {
        RunPlan {
            workflow: "CI".to_string(),
            job: "test".to_string(),
            trigger,
            group: None,
            cancel_in_progress: false,
            env: BTreeMap::from([("CI".to_string(), "1".to_string())]),
            steps: steps.iter().map(|s| StepConfig::shell(*s, *s)).collect(),
        }
    }

    #[test]
    fn test_same_commit_same_identity() {
        let push = RunSpec::from_plan(&plan(Trigger::push("refs/heads/main", "abc"), &["true"]));
        let pr = RunSpec::from_plan(&plan(
            Trigger::pull_request("refs/pull/1/merge", "main", "abc"),
            &["true"],
        ));
        assert_eq!(push.digest(), pr.digest());
        assert_eq!(push.digest().len(), 64);
    }

    #[test]
    fn test_commit_changes_identity() {
        let a = RunSpec::from_plan(&plan(Trigger::push("refs/heads/main", "abc"), &["true"]));
        let b = RunSpec::from_plan(&plan(Trigger::push("refs/heads/main", "abd"), &["true"]));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_step_order_changes_identity() {
        let a = RunSpec::from_plan(&plan(Trigger::push("r", "abc"), &["true", "false"]));
        let b = RunSpec::from_plan(&plan(Trigger::push("r", "abc"), &["false", "true"]));
        assert_ne!(a.steps_digest, b.steps_digest);
        assert_eq!(a.env_digest, b.env_digest);
    }

    #[test]
    fn test_implicit_checkout_ref_is_trigger_commit() {
        let mut implicit = plan(Trigger::push("refs/heads/main", "abc"), &[]);
        implicit.steps.push(StepConfig::new(
            "checkout",
            StepKind::Checkout {
                git_ref: None,
                fetch_depth: 20,
            },
        ));
        let mut explicit = implicit.clone();
        explicit.steps[0].kind = StepKind::Checkout {
            git_ref: Some("abc".to_string()),
            fetch_depth: 20,
        };
        assert_eq!(
            RunSpec::from_plan(&implicit).digest(),
            RunSpec::from_plan(&explicit).digest()
        );
    }
}
