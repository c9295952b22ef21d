//! Step definitions and configuration.

use crate::error::{CiError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default fetch depth of `actions/checkout` when none is given.
pub const DEFAULT_FETCH_DEPTH: u32 = 1;

/// What a step does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Fetch the evaluated commit into the run's working directory.
    Checkout {
        /// Commit or ref to check out; the trigger's commit when `None`.
        git_ref: Option<String>,
        fetch_depth: u32,
    },

    /// rustup toolchain install, optionally overriding the directory default.
    ToolchainInstall {
        toolchain: String,
        profile: String,
        override_default: bool,
    },

    /// Build cache keyed by toolchain and lockfile, then `cargo fetch`.
    DependencyCache,

    /// cargo <command> <args..>
    Cargo { command: String, args: Vec<String> },

    /// sh -e -c <script>
    Shell { script: String },
}

/// Failure classes reported for a failed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepCategory {
    Checkout,
    Toolchain,
    DependencyFetch,
    Test,
    Example,
    Build,
    Shell,
}

impl StepCategory {
    pub fn name(&self) -> &'static str {
        match self {
            StepCategory::Checkout => "checkout",
            StepCategory::Toolchain => "toolchain",
            StepCategory::DependencyFetch => "dependency_fetch",
            StepCategory::Test => "test",
            StepCategory::Example => "example",
            StepCategory::Build => "build",
            StepCategory::Shell => "shell",
        }
    }
}

impl std::fmt::Display for StepCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl StepKind {
    /// Map a workflow `uses:` reference and its resolved `with:` inputs to a step.
    pub fn from_action(step: &str, uses: &str, with: &BTreeMap<String, String>) -> Result<Self> {
        let (action, version) = match uses.split_once('@') {
            Some((action, version)) => (action, Some(version)),
            None => (uses, None),
        };
        let input = |key: &str| with.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let flag = |key: &str| input(key).map(|v| v == "true").unwrap_or(false);

        match action {
            "actions/checkout" => {
                let fetch_depth = match input("fetch-depth") {
                    Some(depth) => depth.parse().map_err(|_| {
                        CiError::InvalidWorkflow(format!(
                            "step '{}': fetch-depth '{}' is not a number",
                            step, depth
                        ))
                    })?,
                    None => DEFAULT_FETCH_DEPTH,
                };
                Ok(StepKind::Checkout {
                    git_ref: input("ref").map(str::to_string),
                    fetch_depth,
                })
            }
            "actions-rs/toolchain" => Ok(StepKind::ToolchainInstall {
                toolchain: input("toolchain").unwrap_or("stable").to_string(),
                profile: input("profile").unwrap_or("default").to_string(),
                override_default: flag("override"),
            }),
            "dtolnay/rust-toolchain" => Ok(StepKind::ToolchainInstall {
                toolchain: input("toolchain")
                    .or(version.filter(|v| !v.starts_with('v')))
                    .unwrap_or("stable")
                    .to_string(),
                profile: "minimal".to_string(),
                override_default: false,
            }),
            "Swatinem/rust-cache" => Ok(StepKind::DependencyCache),
            "actions-rs/cargo" => {
                let command = input("command").ok_or_else(|| {
                    CiError::InvalidWorkflow(format!("step '{}': cargo step needs a command", step))
                })?;
                Ok(StepKind::Cargo {
                    command: command.to_string(),
                    args: input("args")
                        .map(|a| a.split_whitespace().map(str::to_string).collect())
                        .unwrap_or_default(),
                })
            }
            _ => Err(CiError::UnsupportedAction {
                step: step.to_string(),
                uses: uses.to_string(),
            }),
        }
    }

    pub fn category(&self) -> StepCategory {
        match self {
            StepKind::Checkout { .. } => StepCategory::Checkout,
            StepKind::ToolchainInstall { .. } => StepCategory::Toolchain,
            StepKind::DependencyCache => StepCategory::DependencyFetch,
            StepKind::Cargo { command, args } => match command.as_str() {
                "test" => StepCategory::Test,
                "run" if args.iter().any(|a| a == "--example") => StepCategory::Example,
                _ => StepCategory::Build,
            },
            StepKind::Shell { .. } => StepCategory::Shell,
        }
    }

    /// Environment variable holding the retry budget of this step, if it is network-bound.
    pub fn retry_env_var(&self) -> Option<&'static str> {
        match self {
            StepKind::ToolchainInstall { .. } => Some("RUSTUP_MAX_RETRIES"),
            StepKind::DependencyCache => Some("CARGO_NET_RETRY"),
            _ => None,
        }
    }

    /// Short label used in step names and plans.
    pub fn describe(&self) -> String {
        match self {
            StepKind::Checkout {
                git_ref,
                fetch_depth,
            } => format!(
                "checkout {} (depth {})",
                git_ref.as_deref().unwrap_or("<trigger commit>"),
                fetch_depth
            ),
            StepKind::ToolchainInstall {
                toolchain,
                profile,
                override_default,
            } => format!(
                "toolchain {} (profile {}{})",
                toolchain,
                profile,
                if *override_default { ", override" } else { "" }
            ),
            StepKind::DependencyCache => "dependency cache".to_string(),
            StepKind::Cargo { command, args } => {
                let mut s = format!("cargo {}", command);
                for arg in args {
                    s.push(' ');
                    s.push_str(arg);
                }
                s
            }
            StepKind::Shell { script } => format!("sh: {}", script.lines().next().unwrap_or("")),
        }
    }
}

/// Configuration for one step of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepConfig {
    /// Human-readable step name.
    pub name: String,

    pub kind: StepKind,

    /// Timeout in seconds per attempt (0 = none).
    pub timeout_secs: u64,

    /// Whether this step is enabled.
    pub enabled: bool,

    /// Retries applied to the step's commands.
    pub retry: RetryPolicy,

    /// Step-level environment, layered over the workflow environment.
    pub env: BTreeMap<String, String>,
}

impl StepConfig {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            timeout_secs: 0,
            enabled: true,
            retry: RetryPolicy::none(),
            env: BTreeMap::new(),
        }
    }

    /// A shell step, mostly useful for tests and ad-hoc pipelines.
    pub fn shell(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(
            name,
            StepKind::Shell {
                script: script.into(),
            },
        )
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Disable this step.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
