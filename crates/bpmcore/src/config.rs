use crate::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Complete process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub public_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub start_step_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: Payload,
    #[serde(default = "default_process_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProcessConfig {
    pub fn new(public_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            public_id: public_id.into(),
            name: name.into(),
            description: None,
            version: default_version(),
            is_active: true,
            steps: Vec::new(),
            start_step_id: None,
            settings: Payload::new(),
            timeout_seconds: default_process_timeout(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_step(mut self, step: StepConfig) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_start_step(mut self, step_id: impl Into<String>) -> Self {
        self.start_step_id = Some(step_id.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn find_step(&self, public_id: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.public_id == public_id)
    }

    /// Steps with no successors, in definition order
    pub fn terminal_steps(&self) -> impl Iterator<Item = &StepConfig> {
        self.steps.iter().filter(|s| s.is_terminal())
    }
}

/// One node of a process graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    pub public_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_step_type")]
    pub step_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next_step_ids: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: Payload,
    /// JSON pointer into `{input, steps, parameters}`; blank means the process input
    #[serde(default)]
    pub input_mapping: Option<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub order: i32,
}

impl StepConfig {
    pub fn new(public_id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            public_id: public_id.into(),
            name: String::new(),
            description: None,
            step_type: step_type.into(),
            next_step_ids: Vec::new(),
            settings: Payload::new(),
            input_mapping: None,
            timeout_seconds: default_step_timeout(),
            retry_count: 0,
            order: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_next<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next_step_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_input_mapping(mut self, pointer: impl Into<String>) -> Self {
        self.input_mapping = Some(pointer.into());
        self
    }

    pub fn with_retry(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.next_step_ids.is_empty()
    }
}

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

fn default_process_timeout() -> u64 {
    300
}

fn default_step_timeout() -> u64 {
    30
}

fn default_step_type() -> String {
    "Default".to_string()
}

// Definitions written by other tools send `null` for empty lists and maps.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
