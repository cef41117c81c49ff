use async_trait::async_trait;
use bpmcore::{HandlerMetadata, StepContext, StepError, StepHandler, StepOutcome};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tokio::time::{sleep, Duration};

/// Template step: waits, then reports its message and the input size
pub struct SampleStep;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SampleSettings {
    message: String,
    delay_ms: u64,
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self {
            message: "Sample step executed".to_string(),
            delay_ms: 100,
        }
    }
}

#[async_trait]
impl StepHandler for SampleStep {
    fn step_type(&self) -> &str {
        "sample"
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        let started = Instant::now();
        let settings: SampleSettings = ctx.parse_settings()?;
        tracing::debug!(step_id = %ctx.step_id, ?settings, "sample step");

        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(StepError::Cancelled),
            _ = sleep(Duration::from_millis(settings.delay_ms)) => {}
        }

        Ok(StepOutcome::success(json!({
            "message": settings.message,
            "inputKeysCount": ctx.input.len(),
            "timestamp": Utc::now(),
        }))
        .with_duration(started.elapsed()))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Waits delayMs, then echoes its message and input key count".to_string(),
            category: "general".to_string(),
        }
    }
}
