//! Pass/fail evaluation of a recorded run.

use crate::events::{CiEvent, RecordedEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    pub message: String,
}

/// Checks a run's event stream against the fail-fast contract.
pub struct RunGate;

impl RunGate {
    /// Evaluate a run.
    ///
    /// - every started step must finish
    /// - a failed step is a violation
    /// - no step may start after a step has failed
    /// - the run must finish, and must not report success over a failed step
    pub fn evaluate(events: &[RecordedEvent]) -> GateVerdict {
        let mut violations = Vec::new();
        let mut open = HashSet::new();
        let mut first_failure: Option<String> = None;
        let mut finished = false;

        for recorded in events {
            match &recorded.event {
                CiEvent::StepStarted { step, .. } => {
                    if let Some(failed) = &first_failure {
                        violations.push(format!(
                            "Step '{}' started after '{}' failed",
                            step, failed
                        ));
                    }
                    open.insert(step.clone());
                }
                CiEvent::StepFinished {
                    step,
                    category,
                    exit_code,
                    passed,
                    ..
                } => {
                    open.remove(step);
                    if !passed {
                        violations.push(format!(
                            "Step '{}' ({}) failed with exit code {}",
                            step, category, exit_code
                        ));
                        first_failure.get_or_insert_with(|| step.clone());
                    }
                }
                CiEvent::RunFinished { status, .. } => {
                    finished = true;
                    match status.as_str() {
                        "success" if first_failure.is_some() => {
                            violations.push("Run reported success after a failed step".to_string())
                        }
                        "cancelled" => violations.push("Run was cancelled".to_string()),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        let mut unfinished: Vec<_> = open.into_iter().collect();
        unfinished.sort();
        for step in unfinished {
            violations.push(format!("Step '{}' was started but never finished", step));
        }
        if !finished {
            violations.push("Run never finished".to_string());
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All steps passed".to_string()
        } else {
            format!("Gate failed with {} violation(s)", violations.len())
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}
