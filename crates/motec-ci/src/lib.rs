//! Local executor for GitHub Actions style CI workflows.
//!
//! Loads a workflow, filters trigger events, enforces concurrency groups and
//! runs the job's steps in order, halting at the first failure. Every run is
//! recorded in a [`RunLedger`] and can be checked with [`RunGate`].
//!
//! Concurrency groups are per process unless a lock directory is configured,
//! in which case every process using that directory shares them.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod events;
pub mod expr;
pub mod gate;
mod group_files;
pub mod ledger;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod runner;
pub mod spec;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use concurrency::{cancel_pair, Admission, CancelHandle, CancelToken, ConcurrencyGroups};
pub use config::RunnerConfig;
pub use error::{CiError, Result};
pub use events::{CiEvent, RecordedEvent};
pub use gate::{GateVerdict, RunGate};
pub use ledger::{MemoryRunLedger, RunId, RunLedger, RunMetadata, RunRecord, RunStatus};
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, RunOutcome, CANCELLED_EXIT_CODE};
pub use retry::RetryPolicy;
pub use runner::{Invocation, ProcessExecutor, StepExecutor, StepOutput, StepResult};
pub use spec::RunSpec;
pub use step::{StepCategory, StepConfig, StepKind};
pub use trigger::{Trigger, TriggerEvent};
pub use workflow::{RunPlan, Workflow, DEFAULT_WORKFLOW_PATH};
