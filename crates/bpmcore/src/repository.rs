//! Contracts for the collaborators the engine reads definitions from and
//! reports run history to.

use crate::{ProcessConfig, Result, StartRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Status recorded in run history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
        };
        f.write_str(text)
    }
}

/// History record for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    pub instance_id: Uuid,
    pub correlation_id: Option<String>,
    pub process_public_id: String,
    pub status: RunStatus,
    pub input_arguments: Value,
    pub output_result: Option<Value>,
    pub error_message: Option<String>,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessInstance {
    /// Fresh `Pending` record snapshotting the request
    pub fn pending(request: &StartRequest) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            correlation_id: request.correlation_id.clone(),
            process_public_id: request.process_public_id.clone(),
            status: RunStatus::Pending,
            input_arguments: request.input_arguments.clone(),
            output_result: None,
            error_message: None,
            source: request.source.clone(),
            created_at: request.created_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, output: Value) {
        self.status = RunStatus::Completed;
        self.output_result = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Utc::now());
    }
}

/// Run-history sink
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn create(&self, instance: &ProcessInstance) -> Result<()>;

    async fn update(&self, instance: &ProcessInstance) -> Result<()>;

    async fn get_by_instance_id(&self, instance_id: Uuid) -> Result<Option<ProcessInstance>>;

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<ProcessInstance>>;

    /// Newest first
    async fn list_by_process(&self, process_public_id: &str) -> Result<Vec<ProcessInstance>>;

    /// Newest first
    async fn recent(&self, count: usize) -> Result<Vec<ProcessInstance>>;
}

/// Source of process definitions
#[async_trait]
pub trait ProcessConfigStore: Send + Sync {
    async fn get_by_public_id(&self, public_id: &str) -> Result<Option<ProcessConfig>>;

    async fn list_active(&self) -> Result<Vec<ProcessConfig>>;

    async fn create(&self, config: ProcessConfig) -> Result<ProcessConfig>;

    async fn update(&self, config: ProcessConfig) -> Result<ProcessConfig>;

    async fn delete(&self, public_id: &str) -> Result<bool>;

    async fn exists(&self, public_id: &str) -> Result<bool>;
}
