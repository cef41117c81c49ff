//! Core abstractions for the process engine
//!
//! This crate provides the definitions, run requests, per-run state and the
//! step handler contract that the runtime, the step library and the outer
//! surfaces all share. It does not execute anything itself.

mod config;
mod error;
pub mod events;
mod handler;
mod payload;
mod repository;
mod request;
mod state;

pub use config::{ProcessConfig, StepConfig};
pub use error::{EngineError, ProcessError, StepError};
pub use events::*;
pub use handler::{HandlerMetadata, StepContext, StepHandler, StepOutcome};
pub use payload::{to_payload, Payload, WRAPPED_VALUE_KEY};
pub use repository::{InstanceRepository, ProcessConfigStore, ProcessInstance, RunStatus};
pub use request::{StartRequest, SOURCE_API, SOURCE_BROKER, SOURCE_CLI};
pub use state::{ExecutionStatus, ProcessState, StepState};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
