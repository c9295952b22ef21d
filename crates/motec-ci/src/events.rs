//! Run lifecycle events.
//!
//! Events are append-only and ordered by `seq` within a run. The ledger's run
//! record is derived state; the event stream is what the gate evaluates.

use crate::step::StepCategory;
use crate::trigger::TriggerEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CiEvent {
    /// A run was created and is waiting for its concurrency group.
    RunQueued {
        workflow: String,
        group: Option<String>,
        event: TriggerEvent,
        git_ref: String,
        sha: String,
        identity: String,
    },

    RunStarted,

    StepStarted {
        step: String,
        category: StepCategory,
    },

    /// A network-bound command failed and will be attempted again.
    StepRetried {
        step: String,
        attempt: u32,
        exit_code: i32,
        delay_ms: u64,
    },

    StepFinished {
        step: String,
        category: StepCategory,
        exit_code: i32,
        passed: bool,
        attempts: u32,
        duration_ms: u64,
    },

    StepSkipped {
        step: String,
        reason: String,
    },

    RunFinished {
        status: String,
        exit_code: i32,
        duration_ms: u64,
    },
}

impl CiEvent {
    /// Short kind label, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CiEvent::RunQueued { .. } => "run_queued",
            CiEvent::RunStarted => "run_started",
            CiEvent::StepStarted { .. } => "step_started",
            CiEvent::StepRetried { .. } => "step_retried",
            CiEvent::StepFinished { .. } => "step_finished",
            CiEvent::StepSkipped { .. } => "step_skipped",
            CiEvent::RunFinished { .. } => "run_finished",
        }
    }
}

/// An event as stored by a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Monotonic sequence number within the run, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event: CiEvent,
}
