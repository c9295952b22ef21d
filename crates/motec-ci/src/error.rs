//! Error types for workflow loading and run execution

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workflow parse error: {0}")]
    WorkflowParse(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Unsupported action '{uses}' in step '{step}'")]
    UnsupportedAction { step: String, uses: String },

    #[error("Unknown trigger event: {0}")]
    UnknownEvent(String),

    #[error("Workflow '{workflow}' is not triggered by {event}")]
    TriggerNotHandled { workflow: String, event: String },

    #[error("Invalid run status transition: {current} -> {requested}")]
    InvalidStatusTransition { current: String, requested: String },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Step '{step}' has an empty command")]
    EmptyCommand { step: String },

    #[error("Step '{step}' timed out after {timeout_secs} seconds")]
    StepTimeout { step: String, timeout_secs: u64 },

    #[error("Run was cancelled")]
    Cancelled,
}

/// Result type for CI operations
pub type Result<T> = std::result::Result<T, CiError>;
