use async_trait::async_trait;
use bpmcore::{HandlerMetadata, StepContext, StepError, StepHandler, StepOutcome};
use serde_json::Value;
use std::time::Instant;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration, passing the input through
pub struct DelayStep;

#[async_trait]
impl StepHandler for DelayStep {
    fn step_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        let started = Instant::now();
        let delay_ms = match ctx.settings.get("delayMs") {
            None => 1000,
            Some(value) => value.as_u64().ok_or_else(|| StepError::InvalidSetting {
                field: "delayMs".to_string(),
                expected: "non-negative integer".to_string(),
            })?,
        };

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(StepError::Cancelled),
            _ = sleep(Duration::from_millis(delay_ms)) => {}
        }
        ctx.events.progress(100.0, Some("Delay elapsed".to_string()));

        Ok(StepOutcome::success(Value::Object(ctx.input)).with_duration(started.elapsed()))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Delay execution for delayMs milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmcore::{to_payload, EventBus};
    use serde_json::json;
    use uuid::Uuid;

    fn context(settings: Value) -> StepContext {
        let bus = EventBus::new(4);
        StepContext::new("wait", bus.create_emitter(Uuid::new_v4(), "wait"))
            .with_settings(to_payload(&settings))
            .with_input(to_payload(&json!({"id": 1})))
    }

    #[tokio::test]
    async fn passes_input_through() {
        let outcome = DelayStep.execute(context(json!({"delayMs": 5}))).await.unwrap();
        assert_eq!(outcome.output, json!({"id": 1}));
        assert!(outcome.duration >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn rejects_non_numeric_delay() {
        let err = DelayStep
            .execute(context(json!({"delayMs": "soon"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidSetting { .. }));
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let ctx = context(json!({"delayMs": 60_000}));
        ctx.cancellation.cancel();
        assert_eq!(DelayStep.execute(ctx).await.unwrap_err(), StepError::Cancelled);
    }
}
