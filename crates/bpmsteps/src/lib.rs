//! Standard step library
//!
//! Built-in handlers for the step types a process definition can use out of
//! the box.

mod delay;
mod http;
mod sample;
mod script;

pub use delay::DelayStep;
pub use http::HttpRequestStep;
pub use sample::SampleStep;
pub use script::ScriptStep;

use bpmcore::ProcessError;
use bpmruntime::HandlerRegistry;
use std::sync::Arc;

/// Register all standard steps with a registry
pub fn register_all(registry: &mut HandlerRegistry) -> Result<(), ProcessError> {
    registry.register(Arc::new(SampleStep))?;
    registry.register(Arc::new(ScriptStep))?;
    registry.register(Arc::new(HttpRequestStep::new()))?;
    registry.register(Arc::new(DelayStep))?;
    Ok(())
}

/// Registry holding every standard step
pub fn standard_registry() -> Result<HandlerRegistry, ProcessError> {
    let mut registry = HandlerRegistry::new();
    register_all(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmcore::ProcessConfig;
    use bpmcore::StepConfig;
    use bpmruntime::{BpmRuntime, RuntimeConfig};
    use serde_json::json;

    #[test]
    fn registers_each_type_once() {
        let mut registry = standard_registry().unwrap();
        assert_eq!(
            registry.list_step_types(),
            vec!["delay", "http-request", "sample", "script"]
        );
        assert!(register_all(&mut registry).is_err());
    }

    #[tokio::test]
    async fn standard_steps_run_in_a_process() {
        let runtime = BpmRuntime::with_registry(standard_registry().unwrap(), RuntimeConfig::default());
        let process = ProcessConfig::new("demo", "Demo")
            .with_step(
                StepConfig::new("start", "Sample")
                    .with_next(["wait", "calc"])
                    .with_setting("delayMs", 1),
            )
            .with_step(StepConfig::new("wait", "delay").with_setting("delayMs", 1))
            .with_step(StepConfig::new("calc", "script").with_setting("name", "total"));

        let report = runtime.execute(&process, json!({"amount": 3})).await;
        let output = report.output().unwrap();
        assert_eq!(output["wait"], json!({"amount": 3}));
        assert_eq!(output["calc"]["scriptName"], json!("total"));
    }
}
