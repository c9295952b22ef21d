//! Process execution for step commands.

use crate::concurrency::CancelToken;
use crate::error::{CiError, Result};
use crate::step::StepCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// One command of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,

    /// Variables layered over the inherited process environment.
    pub env: BTreeMap<String, String>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
            timeout_secs: 0,
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    /// Exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Result of a step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub category: StepCategory,

    /// Exit code (0 = success, -1 = not spawned, timed out or cancelled).
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,

    /// Attempts made by the step's retried command.
    pub attempts: u32,

    pub duration_ms: u64,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `lines` lines of stderr, falling back to stdout.
    pub fn output_tail(&self, lines: usize) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = text.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Runs invocations on behalf of the pipeline.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run `invocation` to completion.
    ///
    /// Returns `CiError::Cancelled` if `cancel` fires first and
    /// `CiError::StepTimeout` if the timeout elapses. In both cases the child
    /// and every process it started are killed.
    async fn execute(&self, invocation: &Invocation, cancel: &CancelToken) -> Result<StepOutput>;
}

/// Executes invocations as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl StepExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &Invocation, cancel: &CancelToken) -> Result<StepOutput> {
        if invocation.program.is_empty() {
            return Err(CiError::EmptyCommand {
                step: invocation.command_line(),
            });
        }
        debug!(command = %invocation.command_line(), cwd = %invocation.cwd.display(), "Spawning");

        let start = Instant::now();
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The child leads its own process group so that everything it starts
        // can be killed with it.
        #[cfg(unix)]
        command.process_group(0);
        let child = command.spawn()?;
        let pgid = child.id();

        let timeout_secs = invocation.timeout_secs;
        let deadline = async move {
            if timeout_secs > 0 {
                tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        // Dropping the output future drops the child, which kills it; the
        // rest of its process group is killed explicitly.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = deadline => {
                kill_process_group(pgid);
                return Err(CiError::StepTimeout {
                    step: invocation.command_line(),
                    timeout_secs,
                });
            }
            _ = cancel.cancelled() => {
                kill_process_group(pgid);
                return Err(CiError::Cancelled);
            }
        };

        Ok(StepOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// SIGKILL every process in the group led by `pgid`.
#[cfg(unix)]
fn kill_process_group(pgid: Option<u32>) {
    let Some(pgid) = pgid.and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };
    // SAFETY: killpg takes plain integers and touches no memory.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc == 0 {
        debug!(pgid, "Killed process group");
    } else {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, error = %err, "Failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<u32>) {}
