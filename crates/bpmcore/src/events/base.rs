use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type InstanceId = Uuid;

/// Events emitted while a process instance runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProcessEvent {
    ProcessStarted {
        instance_id: InstanceId,
        process_id: String,
        timestamp: DateTime<Utc>,
    },
    ProcessCompleted {
        instance_id: InstanceId,
        process_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        instance_id: InstanceId,
        step_id: String,
        step_type: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        instance_id: InstanceId,
        step_id: String,
        output: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        instance_id: InstanceId,
        step_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    StepEvent {
        instance_id: InstanceId,
        step_id: String,
        event: StepEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events a handler reports about its own progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StepEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter handed to step handlers
#[derive(Clone)]
pub struct EventEmitter {
    instance_id: InstanceId,
    step_id: String,
    sender: broadcast::Sender<ProcessEvent>,
}

impl EventEmitter {
    pub fn new(
        instance_id: InstanceId,
        step_id: impl Into<String>,
        sender: broadcast::Sender<ProcessEvent>,
    ) -> Self {
        Self {
            instance_id,
            step_id: step_id.into(),
            sender,
        }
    }

    pub fn emit(&self, event: StepEvent) {
        let _ = self.sender.send(ProcessEvent::StepEvent {
            instance_id: self.instance_id,
            step_id: self.step_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(StepEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(StepEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(StepEvent::Progress { percent, message });
    }
}

/// Process-wide event bus
pub struct EventBus {
    sender: broadcast::Sender<ProcessEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ProcessEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, instance_id: InstanceId, step_id: impl Into<String>) -> EventEmitter {
        EventEmitter::new(instance_id, step_id, self.sender.clone())
    }
}
