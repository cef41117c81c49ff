//! Mutable per-run state.
//!
//! A [`ProcessState`] is owned by exactly one process executor for the
//! duration of one run. Step states are created lazily the first time the
//! walk reaches a step and are never reused across runs.

use crate::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle shared by processes and steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub public_step_id: String,
    pub input: Value,
    pub output: Value,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Handler invocations made for this step, retries included
    pub attempts: u32,
    pub parameters: Payload,
}

impl StepState {
    pub fn new(public_step_id: impl Into<String>) -> Self {
        Self {
            public_step_id: public_step_id.into(),
            input: Value::Null,
            output: Value::Null,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            attempts: 0,
            parameters: Payload::new(),
        }
    }

    pub fn set_input(&mut self, input: Value) {
        self.input = input;
    }

    pub fn set_output(&mut self, output: Value) {
        self.output = output;
    }

    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.error_message = None;
    }

    pub fn mark_completed(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error_message: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.error_message = Some("cancelled".to_string());
        self.completed_at = Some(Utc::now());
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameters.insert(key.into(), value.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessState {
    pub instance_id: Uuid,
    pub public_process_id: String,
    pub input_arguments: Value,
    /// Set only on success
    pub output_result: Option<Value>,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub step_states: HashMap<String, StepState>,
    pub parameters: Payload,
}

impl ProcessState {
    pub fn new(public_process_id: impl Into<String>, input_arguments: Value) -> Self {
        Self::with_instance_id(Uuid::new_v4(), public_process_id, input_arguments)
    }

    pub fn with_instance_id(
        instance_id: Uuid,
        public_process_id: impl Into<String>,
        input_arguments: Value,
    ) -> Self {
        Self {
            instance_id,
            public_process_id: public_process_id.into(),
            input_arguments,
            output_result: None,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            step_states: HashMap::new(),
            parameters: Payload::new(),
        }
    }

    pub fn get_or_create_step_state(&mut self, public_step_id: &str) -> &mut StepState {
        self.step_states
            .entry(public_step_id.to_string())
            .or_insert_with(|| StepState::new(public_step_id))
    }

    pub fn step_state(&self, public_step_id: &str) -> Option<&StepState> {
        self.step_states.get(public_step_id)
    }

    pub fn step_output(&self, public_step_id: &str) -> Option<&Value> {
        self.step_states.get(public_step_id).map(|s| &s.output)
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.parameters.insert(key.into(), value.into());
    }

    /// Document that step input mappings are resolved against
    pub fn mapping_scope(&self) -> Value {
        let steps: Payload = self
            .step_states
            .iter()
            .map(|(id, s)| (id.clone(), s.output.clone()))
            .collect();

        serde_json::json!({
            "input": self.input_arguments,
            "steps": steps,
            "parameters": self.parameters,
        })
    }

    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: Value) {
        self.status = ExecutionStatus::Completed;
        self.output_result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_states_are_created_once() {
        let mut state = ProcessState::new("p1", json!({"x": 1}));
        state.get_or_create_step_state("a").set_output(json!("first"));
        state.get_or_create_step_state("a").attempts += 1;

        assert_eq!(state.step_states.len(), 1);
        assert_eq!(state.step_output("a"), Some(&json!("first")));
        assert_eq!(state.step_state("a").map(|s| s.attempts), Some(1));
        assert!(state.step_output("missing").is_none());
    }

    #[test]
    fn process_lifecycle() {
        let mut state = ProcessState::new("p1", Value::Null);
        assert_eq!(state.status, ExecutionStatus::Pending);

        state.mark_running();
        assert!(state.started_at.is_some());
        assert!(!state.status.is_terminal());

        state.mark_completed(json!(7));
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.output_result, Some(json!(7)));
    }

    #[test]
    fn failed_step_keeps_message() {
        let mut step = StepState::new("a");
        step.mark_running();
        step.mark_failed("boom");
        assert_eq!(step.status, ExecutionStatus::Failed);
        assert_eq!(step.error_message.as_deref(), Some("boom"));
        assert!(step.completed_at.is_some());
    }

    #[test]
    fn mapping_scope_exposes_input_steps_and_parameters() {
        let mut state = ProcessState::new("p1", json!({"orderId": 5}));
        state.get_or_create_step_state("fetch").set_output(json!({"total": 10}));
        state.set_parameter("region", "eu");

        let scope = state.mapping_scope();
        assert_eq!(scope.pointer("/input/orderId"), Some(&json!(5)));
        assert_eq!(scope.pointer("/steps/fetch/total"), Some(&json!(10)));
        assert_eq!(scope.pointer("/parameters/region"), Some(&json!("eu")));
    }
}
