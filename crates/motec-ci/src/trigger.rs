//! Trigger events and the context they expose to workflow expressions.

use crate::error::CiError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Repository event that can start a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Push,
    PullRequest,
}

impl TriggerEvent {
    /// Event name as written in a workflow's `on:` list.
    pub fn name(&self) -> &'static str {
        match self {
            TriggerEvent::Push => "push",
            TriggerEvent::PullRequest => "pull_request",
        }
    }
}

impl FromStr for TriggerEvent {
    type Err = CiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "push" => Ok(TriggerEvent::Push),
            "pull_request" | "pull-request" | "pr" => Ok(TriggerEvent::PullRequest),
            other => Err(CiError::UnknownEvent(other.to_string())),
        }
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A concrete event against the repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    pub event: TriggerEvent,

    /// Ref the event happened on (`refs/heads/main`, `refs/pull/7/merge`).
    pub git_ref: String,

    /// Commit the run evaluates: the pushed commit or the pull request head.
    pub sha: String,

    /// Source branch of a pull request.
    pub head_ref: Option<String>,
}

impl Trigger {
    pub fn push(git_ref: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            event: TriggerEvent::Push,
            git_ref: git_ref.into(),
            sha: sha.into(),
            head_ref: None,
        }
    }

    pub fn pull_request(
        git_ref: impl Into<String>,
        head_ref: impl Into<String>,
        head_sha: impl Into<String>,
    ) -> Self {
        Self {
            event: TriggerEvent::PullRequest,
            git_ref: git_ref.into(),
            sha: head_sha.into(),
            head_ref: Some(head_ref.into()),
        }
    }

    /// Values visible to `${{ github.* }}` expressions.
    pub fn context(&self, workflow: &str) -> HashMap<String, String> {
        let mut ctx = HashMap::new();
        ctx.insert("github.workflow".to_string(), workflow.to_string());
        ctx.insert("github.ref".to_string(), self.git_ref.clone());
        ctx.insert("github.sha".to_string(), self.sha.clone());
        ctx.insert("github.event_name".to_string(), self.event.name().to_string());
        if let Some(name) = self.git_ref.strip_prefix("refs/heads/") {
            ctx.insert("github.ref_name".to_string(), name.to_string());
        }
        if self.event == TriggerEvent::PullRequest {
            ctx.insert(
                "github.event.pull_request.head.sha".to_string(),
                self.sha.clone(),
            );
            if let Some(head_ref) = &self.head_ref {
                ctx.insert("github.head_ref".to_string(), head_ref.clone());
                ctx.insert(
                    "github.event.pull_request.head.ref".to_string(),
                    head_ref.clone(),
                );
            }
        }
        ctx
    }
}
