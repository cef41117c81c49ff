use async_trait::async_trait;
use bpmcore::{HandlerMetadata, Payload, StepContext, StepError, StepHandler, StepOutcome};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;

/// Script step. No script engine is wired in yet, so it reports the script
/// it would run along with its input.
pub struct ScriptStep;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScriptSettings {
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_script_type")]
    script_type: String,
    #[serde(default)]
    script: String,
    #[serde(default)]
    parameters: Option<Payload>,
}

fn default_script_type() -> String {
    "expression".to_string()
}

#[async_trait]
impl StepHandler for ScriptStep {
    fn step_type(&self) -> &str {
        "script"
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        let started = Instant::now();
        if ctx.settings.is_empty() {
            return Err(StepError::Configuration("script settings are required".to_string()));
        }
        let settings: ScriptSettings = ctx.parse_settings()?;
        let name = settings.name.as_deref().unwrap_or("anonymous");

        tracing::debug!(
            step_id = %ctx.step_id,
            script = name,
            script_type = %settings.script_type,
            length = settings.script.len(),
            "running script"
        );
        ctx.events.info(format!("Running {} script {}", settings.script_type, name));

        Ok(StepOutcome::success(json!({
            "scriptName": settings.name,
            "scriptType": settings.script_type,
            "parameters": settings.parameters.map(Value::Object),
            "inputData": Value::Object(ctx.input),
            "executedAt": Utc::now(),
        }))
        .with_duration(started.elapsed()))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Runs a named script against the step input".to_string(),
            category: "script".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmcore::{to_payload, EventBus};
    use uuid::Uuid;

    fn context(settings: Value) -> StepContext {
        let bus = EventBus::new(4);
        StepContext::new("calc", bus.create_emitter(Uuid::new_v4(), "calc"))
            .with_settings(to_payload(&settings))
            .with_input(to_payload(&json!({"amount": 10})))
    }

    #[tokio::test]
    async fn reports_script_and_input() {
        let outcome = ScriptStep
            .execute(context(json!({"name": "total", "script": "amount * 2"})))
            .await
            .unwrap();

        assert_eq!(outcome.output["scriptName"], json!("total"));
        assert_eq!(outcome.output["scriptType"], json!("expression"));
        assert_eq!(outcome.output["inputData"], json!({"amount": 10}));
    }

    #[tokio::test]
    async fn requires_settings() {
        let err = ScriptStep.execute(context(Value::Null)).await.unwrap_err();
        assert!(matches!(err, StepError::Configuration(_)));
    }
}
