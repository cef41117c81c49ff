use crate::executor::ProcessExecutor;
use crate::queue::RequestQueue;
use crate::step_executor::StepExecutor;
use bpmcore::{
    EngineError, InstanceRepository, ProcessConfigStore, ProcessError, ProcessInstance,
    StartRequest,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Consumes the request queue and runs one task per request
pub struct DispatchLoop {
    queue: Arc<RequestQueue>,
    configs: Arc<dyn ProcessConfigStore>,
    history: Arc<dyn InstanceRepository>,
    steps: Arc<StepExecutor>,
    limiter: Option<Arc<Semaphore>>,
}

impl DispatchLoop {
    pub fn new(
        queue: Arc<RequestQueue>,
        configs: Arc<dyn ProcessConfigStore>,
        history: Arc<dyn InstanceRepository>,
        steps: Arc<StepExecutor>,
    ) -> Self {
        Self {
            queue,
            configs,
            history,
            steps,
            limiter: None,
        }
    }

    /// Bound how many runs execute at once; further requests wait in the queue
    pub fn with_max_concurrent_runs(mut self, max: Option<usize>) -> Self {
        self.limiter = max.filter(|m| *m > 0).map(|m| Arc::new(Semaphore::new(m)));
        self
    }

    /// Subscribe to the queue and start dispatching in the background.
    ///
    /// The loop stops when `shutdown` fires; in-flight runs are cancelled and
    /// awaited, and requests not yet dispatched are recorded as cancelled,
    /// before the handle resolves.
    pub fn spawn(self, shutdown: CancellationToken) -> Result<JoinHandle<()>, ProcessError> {
        let mut requests = self.queue.subscribe()?;
        let dispatcher = Arc::new(self);

        Ok(tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            tracing::info!("Dispatch loop started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            tracing::error!("Dispatch task aborted: {}", e);
                        }
                    }
                    request = requests.recv() => match request {
                        Some(request) => {
                            let run = dispatcher.clone().run_request(request, shutdown.child_token());
                            tasks.spawn(run);
                        }
                        None => break,
                    },
                }
            }

            tracing::info!(in_flight = tasks.len(), "Dispatch loop stopping");
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("Dispatch task aborted: {}", e);
                }
            }

            // Requests that arrived but were never dispatched
            while let Some(request) = requests.try_recv() {
                dispatcher.abandon(request).await;
            }
        }))
    }

    /// Record a request that will never run as a cancelled run
    async fn abandon(&self, request: StartRequest) {
        self.queue.dequeue(request.request_id);

        let mut instance = ProcessInstance::pending(&request);
        instance.mark_failed("cancelled");
        tracing::warn!(
            instance_id = %instance.instance_id,
            process_id = %request.process_public_id,
            "Request dropped at shutdown"
        );
        if let Err(e) = self.history.create(&instance).await {
            tracing::warn!(instance_id = %instance.instance_id, "Failed to record dropped request: {}", e);
        }
    }

    async fn run_request(self: Arc<Self>, request: StartRequest, cancel: CancellationToken) {
        let _dequeue = DequeueGuard {
            queue: &self.queue,
            request_id: request.request_id,
        };

        let mut instance = ProcessInstance::pending(&request);
        tracing::debug!(
            instance_id = %instance.instance_id,
            process_id = %request.process_public_id,
            "Dispatching request"
        );

        match self.execute(&request, &mut instance, cancel).await {
            Ok(output) => {
                instance.mark_completed(output);
                if let Err(e) = self.history.update(&instance).await {
                    tracing::warn!(instance_id = %instance.instance_id, "Failed to record completion: {}", e);
                }
                tracing::info!(instance_id = %instance.instance_id, "Run completed");
            }
            Err(e) => {
                let message = failure_message(&e);
                tracing::error!(instance_id = %instance.instance_id, "Run failed: {}", message);
                instance.mark_failed(message);
                if let Err(e) = self.history.update(&instance).await {
                    tracing::warn!(instance_id = %instance.instance_id, "Failed to record failure: {}", e);
                }
            }
        }
    }

    async fn execute(
        &self,
        request: &StartRequest,
        instance: &mut ProcessInstance,
        cancel: CancellationToken,
    ) -> Result<Value, EngineError> {
        self.history.create(instance).await?;

        // Held until the run ends; waiting requests stay Pending
        let _permit = match &self.limiter {
            Some(limiter) => tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                permit = limiter.clone().acquire_owned() => {
                    Some(permit.map_err(|_| EngineError::Cancelled)?)
                }
            },
            None => None,
        };

        let config = self
            .configs
            .get_by_public_id(&request.process_public_id)
            .await?
            .ok_or_else(|| ProcessError::NotFound(request.process_public_id.clone()))?;
        if !config.is_active {
            return Err(ProcessError::Inactive(config.public_id).into());
        }

        instance.mark_running();
        self.history.update(instance).await?;

        ProcessExecutor::new(self.steps.clone())
            .with_instance_id(instance.instance_id)
            .execute(&config, request.input_arguments.clone(), cancel)
            .await
            .into_result()
    }
}

/// Removes the request from the queue however the run ends
struct DequeueGuard<'q> {
    queue: &'q RequestQueue,
    request_id: Uuid,
}

impl Drop for DequeueGuard<'_> {
    fn drop(&mut self) {
        self.queue.dequeue(self.request_id);
    }
}

fn failure_message(error: &EngineError) -> String {
    match error {
        EngineError::Cancelled => "cancelled".to_string(),
        EngineError::Process(e) => e.to_string(),
        other => other.to_string(),
    }
}
