use crate::{events::EventEmitter, Payload, StepError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pluggable behavior behind a step type
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Stable type key (e.g., "http-request", "script"); matched case-insensitively
    fn step_type(&self) -> &str;

    /// Run the step with its settings and coerced input.
    ///
    /// A handler reports domain failures through [`StepOutcome::failure`];
    /// an `Err` means it could not run at all. Both fail the step.
    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError>;

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata::default()
    }
}

/// Execution context passed to each handler invocation
#[derive(Clone)]
pub struct StepContext {
    pub step_id: String,

    /// Handler-specific settings from the step definition
    pub settings: Payload,

    pub input: Payload,

    pub events: EventEmitter,

    pub cancellation: CancellationToken,
}

impl StepContext {
    pub fn new(step_id: impl Into<String>, events: EventEmitter) -> Self {
        Self {
            step_id: step_id.into(),
            settings: Payload::new(),
            input: Payload::new(),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: Payload) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_input(mut self, input: Payload) -> Self {
        self.input = input;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn require_setting(&self, name: &str) -> Result<&Value, StepError> {
        self.settings
            .get(name)
            .ok_or_else(|| StepError::MissingSetting(name.to_string()))
    }

    pub fn get_setting_or(&self, name: &str, default: Value) -> Value {
        self.settings.get(name).cloned().unwrap_or(default)
    }

    /// Deserialize the settings into a typed handler config
    pub fn parse_settings<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(Value::Object(self.settings.clone()))
            .map_err(|e| StepError::Configuration(e.to_string()))
    }
}

/// What a handler invocation produced
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    pub output: Value,
    pub error_message: Option<String>,
    pub duration: Duration,
}

impl StepOutcome {
    pub fn success(output: impl Into<Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_message: None,
            duration: Duration::ZERO,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error_message: Some(error_message.into()),
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// Descriptive information about a step type
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub description: String,
    pub category: String,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventBus;
    use serde::Deserialize;
    use serde_json::json;
    use uuid::Uuid;

    fn context(settings: Value) -> StepContext {
        let bus = EventBus::new(4);
        let settings = match settings {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        StepContext::new("s1", bus.create_emitter(Uuid::new_v4(), "s1")).with_settings(settings)
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct DemoSettings {
        delay_ms: u64,
    }

    #[test]
    fn settings_accessors() {
        let ctx = context(json!({"delayMs": 10}));
        assert_eq!(ctx.require_setting("delayMs").unwrap(), &json!(10));
        assert_eq!(
            ctx.require_setting("url").unwrap_err(),
            StepError::MissingSetting("url".to_string())
        );
        assert_eq!(ctx.get_setting_or("method", json!("GET")), json!("GET"));

        let parsed: DemoSettings = ctx.parse_settings().unwrap();
        assert_eq!(parsed.delay_ms, 10);
    }

    #[test]
    fn outcome_constructors() {
        let ok = StepOutcome::success(json!({"a": 1})).with_duration(Duration::from_millis(5));
        assert!(ok.success);
        assert_eq!(ok.duration, Duration::from_millis(5));

        let failed = StepOutcome::failure("boom");
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }
}
