use crate::registry::HandlerRegistry;
use bpmcore::{
    to_payload, EngineError, EventBus, InstanceId, ProcessEvent, ProcessState, StepConfig,
    StepContext, StepError, StepHandler,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Marker placed in the placeholder output of unregistered step types
pub const FALLBACK_WARNING: &str = "Executor not found, fallback used";

#[derive(Debug, Clone)]
pub struct StepExecutorOptions {
    /// Fail steps whose type has no handler instead of echoing a placeholder
    pub strict_step_types: bool,
    pub fallback_delay: Duration,
}

impl Default for StepExecutorOptions {
    fn default() -> Self {
        Self {
            strict_step_types: false,
            fallback_delay: Duration::from_millis(50),
        }
    }
}

/// Runs single steps against the handler registry
pub struct StepExecutor {
    registry: Arc<HandlerRegistry>,
    events: Arc<EventBus>,
    options: StepExecutorOptions,
}

impl StepExecutor {
    pub fn new(registry: Arc<HandlerRegistry>, events: Arc<EventBus>) -> Self {
        Self::with_options(registry, events, StepExecutorOptions::default())
    }

    pub fn with_options(
        registry: Arc<HandlerRegistry>,
        events: Arc<EventBus>,
        options: StepExecutorOptions,
    ) -> Self {
        Self {
            registry,
            events,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Execute one step and record the result in its step state.
    ///
    /// Failures come back as [`EngineError::StepFailed`] naming the step id,
    /// its type and the handler's message; cancellation as
    /// [`EngineError::Cancelled`].
    pub async fn execute(
        &self,
        step: &StepConfig,
        input: Value,
        state: &Mutex<ProcessState>,
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let instance_id = {
            let mut state = state.lock().await;
            let step_state = state.get_or_create_step_state(&step.public_id);
            step_state.set_input(input.clone());
            step_state.mark_running();
            state.instance_id
        };

        info!(step_id = %step.public_id, step_type = %step.step_type, "step started");
        self.events.emit(ProcessEvent::StepStarted {
            instance_id,
            step_id: step.public_id.clone(),
            step_type: step.step_type.clone(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let result = self.run_step(step, &input, instance_id, state, cancel).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut guard = state.lock().await;
        let step_state = guard.get_or_create_step_state(&step.public_id);
        match result {
            Ok(output) => {
                step_state.set_output(output.clone());
                step_state.mark_completed();
                drop(guard);

                info!(step_id = %step.public_id, duration_ms, "step completed");
                self.events.emit(ProcessEvent::StepCompleted {
                    instance_id,
                    step_id: step.public_id.clone(),
                    output: output.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Ok(output)
            }
            Err(err) => {
                if err.is_cancelled() {
                    step_state.mark_cancelled();
                    warn!(step_id = %step.public_id, "step cancelled");
                } else {
                    step_state.mark_failed(err.to_string());
                    error!(step_id = %step.public_id, "step failed: {}", err);
                }
                drop(guard);

                self.events.emit(ProcessEvent::StepFailed {
                    instance_id,
                    step_id: step.public_id.clone(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });
                Err(err)
            }
        }
    }

    async fn run_step(
        &self,
        step: &StepConfig,
        input: &Value,
        instance_id: InstanceId,
        state: &Mutex<ProcessState>,
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let Some(handler) = self.registry.resolve(&step.step_type) else {
            if self.options.strict_step_types {
                return Err(step_failure(step, "no handler registered for this step type"));
            }
            return self.fallback(step, input, instance_id, cancel).await;
        };

        let attempts = step.retry_count.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            state
                .lock()
                .await
                .get_or_create_step_state(&step.public_id)
                .attempts += 1;

            let err = match self.invoke(handler.as_ref(), step, input, instance_id, cancel).await {
                Ok(outcome) if outcome.success => {
                    debug!(
                        step_id = %step.public_id,
                        handler_ms = outcome.duration.as_millis() as u64,
                        "handler succeeded"
                    );
                    return Ok(outcome.output);
                }
                Ok(outcome) => step_failure(
                    step,
                    outcome
                        .error_message
                        .unwrap_or_else(|| "handler reported failure".to_string()),
                ),
                Err(StepError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => step_failure(step, e.to_string()),
            };

            if attempt >= attempts {
                return Err(err);
            }
            warn!(
                step_id = %step.public_id,
                attempt,
                max_attempts = attempts,
                "retrying step after failure: {}",
                err
            );
        }
    }

    /// One handler invocation bounded by the step timeout and the run's cancellation
    async fn invoke(
        &self,
        handler: &dyn StepHandler,
        step: &StepConfig,
        input: &Value,
        instance_id: InstanceId,
        cancel: &CancellationToken,
    ) -> Result<bpmcore::StepOutcome, StepError> {
        let ctx = StepContext::new(
            step.public_id.clone(),
            self.events.create_emitter(instance_id, step.public_id.clone()),
        )
        .with_settings(step.settings.clone())
        .with_input(to_payload(input))
        .with_cancellation(cancel.child_token());

        let execution = async {
            if step.timeout_seconds > 0 {
                match timeout(Duration::from_secs(step.timeout_seconds), handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Timeout {
                        seconds: step.timeout_seconds,
                    }),
                }
            } else {
                handler.execute(ctx).await
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            result = execution => result,
        }
    }

    async fn fallback(
        &self,
        step: &StepConfig,
        input: &Value,
        instance_id: InstanceId,
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        warn!(
            step_id = %step.public_id,
            step_type = %step.step_type,
            "no handler registered, using placeholder"
        );
        self.events
            .create_emitter(instance_id, step.public_id.clone())
            .warn(FALLBACK_WARNING);

        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = sleep(self.options.fallback_delay) => {}
        }

        Ok(json!({
            "input": input,
            "stepId": step.public_id,
            "stepType": step.step_type,
            "executedAt": Utc::now(),
            "warning": FALLBACK_WARNING,
        }))
    }
}

fn step_failure(step: &StepConfig, message: impl Into<String>) -> EngineError {
    EngineError::StepFailed {
        step_id: step.public_id.clone(),
        step_type: step.step_type.clone(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bpmcore::{ExecutionStatus, StepOutcome};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Echo;

    #[async_trait]
    impl StepHandler for Echo {
        fn step_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome::success(Value::Object(ctx.input)))
        }
    }

    /// Fails until the given attempt number, then succeeds
    struct Flaky {
        succeed_on: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StepHandler for Flaky {
        fn step_type(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _ctx: StepContext) -> Result<StepOutcome, StepError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(StepOutcome::success(json!({"call": call})))
            } else {
                Ok(StepOutcome::failure("boom"))
            }
        }
    }

    struct Hang;

    #[async_trait]
    impl StepHandler for Hang {
        fn step_type(&self) -> &str {
            "hang"
        }

        async fn execute(&self, _ctx: StepContext) -> Result<StepOutcome, StepError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(StepOutcome::success(Value::Null))
        }
    }

    fn executor(handlers: Vec<Arc<dyn StepHandler>>, options: StepExecutorOptions) -> StepExecutor {
        let mut registry = HandlerRegistry::new();
        for handler in handlers {
            registry.register(handler).unwrap();
        }
        StepExecutor::with_options(Arc::new(registry), Arc::new(EventBus::new(64)), options)
    }

    fn state() -> Mutex<ProcessState> {
        Mutex::new(ProcessState::new("p1", json!({"x": 1})))
    }

    #[tokio::test]
    async fn records_input_and_output() {
        let exec = executor(vec![Arc::new(Echo)], StepExecutorOptions::default());
        let state = state();
        let step = StepConfig::new("a", "ECHO");

        let output = exec
            .execute(&step, json!({"x": 1}), &state, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, json!({"x": 1}));

        let state = state.lock().await;
        let step_state = state.step_state("a").unwrap();
        assert_eq!(step_state.status, ExecutionStatus::Completed);
        assert_eq!(step_state.input, json!({"x": 1}));
        assert_eq!(step_state.output, json!({"x": 1}));
        assert_eq!(step_state.attempts, 1);
    }

    #[tokio::test]
    async fn largest_retry_count_keeps_retrying() {
        let flaky = Arc::new(Flaky {
            succeed_on: 2,
            calls: AtomicU32::new(0),
        });
        let exec = executor(vec![flaky], StepExecutorOptions::default());
        let state = state();

        let output = exec
            .execute(
                &StepConfig::new("a", "flaky").with_retry(u32::MAX),
                json!({}),
                &state,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output, json!({"call": 2}));
        assert_eq!(state.lock().await.step_state("a").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn scalar_input_is_wrapped_for_handlers() {
        let exec = executor(vec![Arc::new(Echo)], StepExecutorOptions::default());
        let output = exec
            .execute(&StepConfig::new("a", "echo"), json!(5), &state(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, json!({"value": 5}));
    }

    #[tokio::test]
    async fn reported_failure_names_step_and_message() {
        let flaky = Arc::new(Flaky {
            succeed_on: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let exec = executor(vec![flaky], StepExecutorOptions::default());
        let state = state();

        let err = exec
            .execute(&StepConfig::new("charge", "flaky"), json!({}), &state, &CancellationToken::new())
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("charge"));
        assert!(text.contains("flaky"));
        assert!(text.contains("boom"));

        let state = state.lock().await;
        let step_state = state.step_state("charge").unwrap();
        assert_eq!(step_state.status, ExecutionStatus::Failed);
        assert!(step_state.error_message.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn retries_up_to_retry_count() {
        let flaky = Arc::new(Flaky {
            succeed_on: 3,
            calls: AtomicU32::new(0),
        });
        let exec = executor(vec![flaky.clone()], StepExecutorOptions::default());
        let state = state();

        let output = exec
            .execute(
                &StepConfig::new("a", "flaky").with_retry(2),
                json!({}),
                &state,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(output, json!({"call": 3}));
        assert_eq!(state.lock().await.step_state("a").unwrap().attempts, 3);

        let exhausted = Arc::new(Flaky {
            succeed_on: 3,
            calls: AtomicU32::new(0),
        });
        let exec = executor(vec![exhausted.clone()], StepExecutorOptions::default());
        let result = exec
            .execute(
                &StepConfig::new("a", "flaky").with_retry(1),
                json!({}),
                &state,
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(exhausted.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregistered_type_falls_back_to_placeholder() {
        let exec = executor(
            vec![],
            StepExecutorOptions {
                fallback_delay: Duration::from_millis(1),
                ..StepExecutorOptions::default()
            },
        );

        let mut events = exec.events().subscribe();

        let output = exec
            .execute(&StepConfig::new("a", "mystery"), json!({"x": 1}), &state(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output["warning"], json!(FALLBACK_WARNING));
        assert_eq!(output["input"], json!({"x": 1}));
        assert_eq!(output["stepType"], json!("mystery"));

        let mut warned = false;
        while let Ok(event) = events.try_recv() {
            if let ProcessEvent::StepEvent {
                event: bpmcore::StepEvent::Warning { message },
                ..
            } = event
            {
                warned = message == FALLBACK_WARNING;
            }
        }
        assert!(warned);
    }

    #[tokio::test]
    async fn strict_mode_fails_unregistered_type() {
        let exec = executor(
            vec![],
            StepExecutorOptions {
                strict_step_types: true,
                ..StepExecutorOptions::default()
            },
        );

        let err = exec
            .execute(&StepConfig::new("a", "mystery"), json!({}), &state(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StepFailed { .. }));
    }

    #[tokio::test]
    async fn step_timeout_fails_the_step() {
        let exec = executor(vec![Arc::new(Hang)], StepExecutorOptions::default());

        let err = exec
            .execute(
                &StepConfig::new("slow", "hang").with_timeout(1),
                json!({}),
                &state(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Timeout after 1s"));
    }

    #[tokio::test]
    async fn cancellation_marks_step_cancelled() {
        let exec = executor(vec![Arc::new(Hang)], StepExecutorOptions::default());
        let state = state();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = exec
            .execute(&StepConfig::new("slow", "hang").with_timeout(0), json!({}), &state, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(
            state.lock().await.step_state("slow").unwrap().status,
            ExecutionStatus::Cancelled
        );
    }
}
