//! Run persistence.
//!
//! A run moves `Queued -> Running -> Success | Failure | Cancelled`. A queued
//! run may also be cancelled directly when it is superseded before it starts.
//! Terminal runs are immutable.

use crate::error::{CiError, Result};
use crate::events::{CiEvent, RecordedEvent};
use crate::trigger::Trigger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Unique identifier for a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Running)
                | (RunStatus::Queued, RunStatus::Cancelled)
                | (RunStatus::Running, RunStatus::Success)
                | (RunStatus::Running, RunStatus::Failure)
                | (RunStatus::Running, RunStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failure => write!(f, "failure"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Metadata attached to a run at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub workflow: String,
    pub group: Option<String>,
    pub trigger: Trigger,
    /// Identity digest of the planned run.
    pub identity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Execution run ledger.
///
/// `create_run`, `start_run` and `finish_run` append the matching lifecycle
/// events themselves; callers append step events in between.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Create a queued run and record `RunQueued`.
    async fn create_run(&self, metadata: RunMetadata) -> Result<RunId>;

    /// Move a queued run to running and record `RunStarted`.
    async fn start_run(&self, run_id: &RunId) -> Result<()>;

    /// Append an event, returning its sequence number. Fails once the run is terminal.
    async fn append_event(&self, run_id: &RunId, event: CiEvent) -> Result<u64>;

    /// Record `RunFinished` and move the run to a terminal status.
    async fn finish_run(&self, run_id: &RunId, status: RunStatus, exit_code: i32) -> Result<()>;

    async fn get_run(&self, run_id: &RunId) -> Result<RunRecord>;

    async fn get_events(&self, run_id: &RunId) -> Result<Vec<RecordedEvent>>;

    /// All runs, oldest first.
    async fn list_runs(&self) -> Result<Vec<RunRecord>>;
}

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    events: Vec<RecordedEvent>,
}

impl RunState {
    fn push(&mut self, event: CiEvent) -> u64 {
        let seq = self.events.len() as u64 + 1;
        self.events.push(RecordedEvent {
            seq,
            timestamp: Utc::now(),
            event,
        });
        seq
    }

    fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.record.status.can_transition_to(next) {
            return Err(CiError::InvalidStatusTransition {
                current: self.record.status.to_string(),
                requested: next.to_string(),
            });
        }
        self.record.status = next;
        Ok(())
    }
}

/// In-memory run ledger.
///
/// Keeps every run unless a retention limit is set, in which case the oldest
/// finished runs are dropped once the limit is exceeded. Queued and running
/// runs are never dropped.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunState>>,
    order: Mutex<Vec<RunId>>,
    max_runs: Option<usize>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(max_runs: usize) -> Self {
        Self {
            max_runs: Some(max_runs),
            ..Self::default()
        }
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, RunState>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_finished(&self, max_runs: usize) {
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        let mut runs = self.runs();
        let mut excess = order.len().saturating_sub(max_runs);
        order.retain(|id| {
            if excess == 0 {
                return true;
            }
            let finished = runs
                .get(&id.0)
                .map(|s| s.record.status.is_terminal())
                .unwrap_or(true);
            if finished {
                runs.remove(&id.0);
                excess -= 1;
            }
            !finished
        });
    }
}

fn not_found(run_id: &RunId) -> CiError {
    CiError::RunNotFound(run_id.0.clone())
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(&self, metadata: RunMetadata) -> Result<RunId> {
        let run_id = RunId::new();
        let queued = CiEvent::RunQueued {
            workflow: metadata.workflow.clone(),
            group: metadata.group.clone(),
            event: metadata.trigger.event,
            git_ref: metadata.trigger.git_ref.clone(),
            sha: metadata.trigger.sha.clone(),
            identity: metadata.identity.clone(),
        };
        let mut state = RunState {
            record: RunRecord {
                run_id: run_id.clone(),
                metadata,
                status: RunStatus::Queued,
                exit_code: None,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
            },
            events: Vec::new(),
        };
        state.push(queued);

        self.runs().insert(run_id.0.clone(), state);
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(run_id.clone());
        if let Some(max_runs) = self.max_runs {
            self.evict_finished(max_runs);
        }
        Ok(run_id)
    }

    async fn start_run(&self, run_id: &RunId) -> Result<()> {
        let mut runs = self.runs();
        let state = runs.get_mut(&run_id.0).ok_or_else(|| not_found(run_id))?;
        state.transition(RunStatus::Running)?;
        state.record.started_at = Some(Utc::now());
        state.push(CiEvent::RunStarted);
        Ok(())
    }

    async fn append_event(&self, run_id: &RunId, event: CiEvent) -> Result<u64> {
        let mut runs = self.runs();
        let state = runs.get_mut(&run_id.0).ok_or_else(|| not_found(run_id))?;
        if state.record.status.is_terminal() {
            return Err(CiError::InvalidStatusTransition {
                current: state.record.status.to_string(),
                requested: event.kind().to_string(),
            });
        }
        Ok(state.push(event))
    }

    async fn finish_run(&self, run_id: &RunId, status: RunStatus, exit_code: i32) -> Result<()> {
        let mut runs = self.runs();
        let state = runs.get_mut(&run_id.0).ok_or_else(|| not_found(run_id))?;
        state.transition(status)?;

        let now = Utc::now();
        let since = state.record.started_at.unwrap_or(state.record.created_at);
        let duration_ms = (now - since).num_milliseconds().max(0) as u64;
        state.record.exit_code = Some(exit_code);
        state.record.finished_at = Some(now);
        state.push(CiEvent::RunFinished {
            status: status.to_string(),
            exit_code,
            duration_ms,
        });
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> Result<RunRecord> {
        self.runs()
            .get(&run_id.0)
            .map(|s| s.record.clone())
            .ok_or_else(|| not_found(run_id))
    }

    async fn get_events(&self, run_id: &RunId) -> Result<Vec<RecordedEvent>> {
        self.runs()
            .get(&run_id.0)
            .map(|s| s.events.clone())
            .ok_or_else(|| not_found(run_id))
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let order = self
            .order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let runs = self.runs();
        Ok(order
            .iter()
            .filter_map(|id| runs.get(&id.0).map(|s| s.record.clone()))
            .collect())
    }
}
