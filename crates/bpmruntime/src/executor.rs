use crate::graph::ProcessGraph;
use crate::step_executor::StepExecutor;
use bpmcore::{
    EngineError, EventBus, ExecutionStatus, InstanceId, ProcessConfig, ProcessEvent, ProcessState,
    StepConfig,
};
use chrono::Utc;
use futures::future::{self, join_all, BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Runs one process instance end-to-end.
///
/// An executor is consumed by [`ProcessExecutor::execute`], so each instance
/// drives exactly one run.
pub struct ProcessExecutor {
    steps: Arc<StepExecutor>,
    events: Arc<EventBus>,
    instance_id: InstanceId,
}

/// Final state of a run together with its outcome
#[derive(Debug)]
pub struct RunReport {
    pub state: ProcessState,
    pub result: Result<Value, EngineError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn output(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    pub fn into_result(self) -> Result<Value, EngineError> {
        self.result
    }
}

impl ProcessExecutor {
    pub fn new(steps: Arc<StepExecutor>) -> Self {
        let events = steps.events().clone();
        Self {
            steps,
            events,
            instance_id: Uuid::new_v4(),
        }
    }

    /// Use the id of an existing run record for state and events
    pub fn with_instance_id(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub async fn execute(
        self,
        config: &ProcessConfig,
        input: Value,
        cancel: CancellationToken,
    ) -> RunReport {
        let mut state =
            ProcessState::with_instance_id(self.instance_id, config.public_id.clone(), input);
        state.mark_running();
        let state = Mutex::new(state);

        self.events.emit(ProcessEvent::ProcessStarted {
            instance_id: self.instance_id,
            process_id: config.public_id.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            instance_id = %self.instance_id,
            process_id = %config.public_id,
            "Starting process execution"
        );

        let start_time = Instant::now();
        let result = self.run(config, &state, &cancel).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        let mut state = state.into_inner();
        match &result {
            Ok(output) => {
                state.mark_completed(output.clone());
                tracing::info!(
                    instance_id = %self.instance_id,
                    duration_ms,
                    "Process completed"
                );
            }
            Err(e) if e.is_cancelled() => {
                state.mark_cancelled();
                tracing::warn!(instance_id = %self.instance_id, "Process cancelled");
            }
            Err(e) => {
                state.mark_failed();
                tracing::error!(instance_id = %self.instance_id, "Process failed: {}", e);
            }
        }

        self.events.emit(ProcessEvent::ProcessCompleted {
            instance_id: self.instance_id,
            process_id: config.public_id.clone(),
            success: state.status == ExecutionStatus::Completed,
            duration_ms,
            timestamp: Utc::now(),
        });

        RunReport { state, result }
    }

    async fn run(
        &self,
        config: &ProcessConfig,
        state: &Mutex<ProcessState>,
        cancel: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let graph = ProcessGraph::build(config)?;
        let start = graph.start_step(config)?;
        tracing::debug!(start_step = %start.public_id, "Resolved start step");

        let run_cancel = cancel.child_token();
        let walk = GraphWalk {
            config,
            steps: self.steps.as_ref(),
            state,
            cancel: &run_cancel,
            arrivals: graph
                .arrival_counts(&start.public_id)
                .into_iter()
                .map(|(id, count)| (id, AtomicUsize::new(count)))
                .collect(),
        };

        let timeout_seconds = config.timeout_seconds;
        let deadline = async move {
            if timeout_seconds > 0 {
                sleep(Duration::from_secs(timeout_seconds)).await
            } else {
                future::pending::<()>().await
            }
        };

        let visit = walk.visit(start);
        tokio::pin!(visit);
        tokio::select! {
            result = &mut visit => result?,
            _ = deadline => {
                // Let in-flight steps observe cancellation and record it
                run_cancel.cancel();
                let _ = visit.await;
                return Err(EngineError::Timeout { seconds: timeout_seconds });
            }
        }

        let state = state.lock().await;
        Ok(collect_final_result(config, &state))
    }
}

/// Shared context for one recursive walk of the step graph
struct GraphWalk<'a> {
    config: &'a ProcessConfig,
    steps: &'a StepExecutor,
    state: &'a Mutex<ProcessState>,
    cancel: &'a CancellationToken,
    /// Remaining predecessor arrivals before a step may run
    arrivals: HashMap<String, AtomicUsize>,
}

impl<'a> GraphWalk<'a> {
    fn visit<'w>(&'w self, step: &'a StepConfig) -> BoxFuture<'w, Result<(), EngineError>> {
        async move {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let input = self.resolve_input(step).await;
            self.steps.execute(step, input, self.state, self.cancel).await?;

            match step.next_step_ids.as_slice() {
                [] => Ok(()),
                [next] => self.arrive(next).await,
                branches => {
                    tracing::debug!(
                        step_id = %step.public_id,
                        branches = branches.len(),
                        "Fanning out"
                    );
                    // Wait for every branch, then surface the first failure
                    join_all(branches.iter().map(|next| self.arrive(next)))
                        .await
                        .into_iter()
                        .collect::<Result<Vec<_>, _>>()
                        .map(|_| ())
                }
            }
        }
        .boxed()
    }

    /// Record one predecessor arriving at `step_id`; the last arrival runs it
    fn arrive<'w>(&'w self, step_id: &'w str) -> BoxFuture<'w, Result<(), EngineError>> {
        if let Some(remaining) = self.arrivals.get(step_id) {
            if remaining.fetch_sub(1, Ordering::AcqRel) > 1 {
                tracing::debug!(step_id, "Waiting for remaining branches to join");
                return future::ready(Ok(())).boxed();
            }
        }

        match self.config.find_step(step_id) {
            Some(step) => self.visit(step),
            None => future::ready(Err(EngineError::Process(bpmcore::ProcessError::UnknownStep {
                process_id: self.config.public_id.clone(),
                step_id: step_id.to_string(),
            })))
            .boxed(),
        }
    }

    /// Process input, or the JSON Pointer target of the step's input mapping
    async fn resolve_input(&self, step: &StepConfig) -> Value {
        let state = self.state.lock().await;
        match step.input_mapping.as_deref().map(str::trim) {
            None | Some("") => state.input_arguments.clone(),
            Some(mapping) => {
                let pointer = format!("/{}", mapping.trim_start_matches('/'));
                let resolved = state.mapping_scope().pointer(&pointer).cloned();
                if resolved.is_none() {
                    tracing::warn!(
                        step_id = %step.public_id,
                        mapping,
                        "Input mapping resolved to nothing"
                    );
                }
                resolved.unwrap_or(Value::Null)
            }
        }
    }
}

/// Output of the only terminal step, or a map from every terminal step id to
/// its output (`null` for terminal steps the walk never reached)
fn collect_final_result(config: &ProcessConfig, state: &ProcessState) -> Value {
    let terminals: Vec<&StepConfig> = config.terminal_steps().collect();
    let output_of = |step: &StepConfig| {
        state
            .step_output(&step.public_id)
            .cloned()
            .unwrap_or(Value::Null)
    };

    if let [only] = terminals.as_slice() {
        return output_of(only);
    }

    let map: Map<String, Value> = terminals
        .into_iter()
        .map(|step| (step.public_id.clone(), output_of(step)))
        .collect();
    Value::Object(map)
}
