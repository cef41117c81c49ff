use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Step {step_id} ({step_type}) failed: {message}")]
    StepFailed {
        step_id: String,
        step_type: String,
        message: String,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("Timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

/// Errors raised by step handlers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("Missing required setting: {0}")]
    MissingSetting(String),

    #[error("Invalid setting '{field}': expected {expected}")]
    InvalidSetting { field: String, expected: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Errors in process definitions and engine wiring
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessError {
    #[error("Configuration not found: {0}")]
    NotFound(String),

    #[error("Configuration inactive: {0}")]
    Inactive(String),

    #[error("Configuration already exists: {0}")]
    AlreadyExists(String),

    #[error("Start step not found: '{step_id}' in process {process_id}")]
    StartStepNotFound { process_id: String, step_id: String },

    #[error("No start step in process {0}: every step is referenced by another")]
    NoStartStep(String),

    #[error("Ambiguous start step in process {process_id}: candidates {candidates:?}")]
    AmbiguousStartStep {
        process_id: String,
        candidates: Vec<String>,
    },

    #[error("Unknown step '{step_id}' referenced in process {process_id}")]
    UnknownStep { process_id: String, step_id: String },

    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Cyclic dependency detected in process {0}")]
    CyclicDependency(String),

    #[error("Invalid process: {0}")]
    Invalid(String),

    #[error("Step type already registered: {0}")]
    DuplicateHandler(String),

    #[error("Request queue already has a subscriber")]
    QueueAlreadySubscribed,
}
