use crate::dispatcher::DispatchLoop;
use crate::executor::{ProcessExecutor, RunReport};
use crate::queue::RequestQueue;
use crate::registry::HandlerRegistry;
use crate::step_executor::{StepExecutor, StepExecutorOptions};
use crate::store::{InMemoryConfigStore, InMemoryInstanceStore};
use bpmcore::{
    EngineError, EventBus, InstanceRepository, ProcessConfig, ProcessConfigStore, ProcessError,
    ProcessEvent, StartRequest,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Main entry point: wires the queue, dispatch loop, executors and stores
pub struct BpmRuntime {
    config: RuntimeConfig,
    registry: Arc<HandlerRegistry>,
    event_bus: Arc<EventBus>,
    steps: Arc<StepExecutor>,
    queue: Arc<RequestQueue>,
    configs: Arc<dyn ProcessConfigStore>,
    history: Arc<dyn InstanceRepository>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BpmRuntime {
    /// Runtime with no handlers and in-memory stores
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_registry(HandlerRegistry::new(), config)
    }

    pub fn with_registry(registry: HandlerRegistry, config: RuntimeConfig) -> Self {
        Self::with_stores(
            registry,
            config,
            Arc::new(InMemoryConfigStore::new()),
            Arc::new(InMemoryInstanceStore::new()),
        )
    }

    /// Runtime backed by caller-provided definition and history stores
    pub fn with_stores(
        registry: HandlerRegistry,
        config: RuntimeConfig,
        configs: Arc<dyn ProcessConfigStore>,
        history: Arc<dyn InstanceRepository>,
    ) -> Self {
        let registry = Arc::new(registry);
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let steps = Arc::new(StepExecutor::with_options(
            registry.clone(),
            event_bus.clone(),
            StepExecutorOptions {
                strict_step_types: config.strict_step_types,
                fallback_delay: Duration::from_millis(config.fallback_delay_ms),
            },
        ));

        Self {
            config,
            registry,
            event_bus,
            steps,
            queue: Arc::new(RequestQueue::new()),
            configs,
            history,
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Start the dispatch loop. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), ProcessError> {
        let handle = DispatchLoop::new(
            self.queue.clone(),
            self.configs.clone(),
            self.history.clone(),
            self.steps.clone(),
        )
        .with_max_concurrent_runs(self.config.max_concurrent_runs)
        .spawn(self.shutdown.clone())?;

        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::info!(
            step_types = self.registry.len(),
            max_concurrent_runs = ?self.config.max_concurrent_runs,
            "BPM runtime started"
        );
        Ok(())
    }

    /// Queue a run; the caller learns the outcome later from run history
    pub fn submit(&self, mut request: StartRequest) -> Uuid {
        request.ensure_correlation_id();
        self.queue.enqueue(request)
    }

    /// Run a stored process to completion without going through the queue
    pub async fn execute_process(
        &self,
        public_id: &str,
        input: Value,
    ) -> Result<RunReport, EngineError> {
        let config = self
            .configs
            .get_by_public_id(public_id)
            .await?
            .ok_or_else(|| ProcessError::NotFound(public_id.to_string()))?;
        if !config.is_active {
            return Err(ProcessError::Inactive(config.public_id).into());
        }

        Ok(self.execute(&config, input).await)
    }

    /// Run a definition directly, without storing it
    pub async fn execute(&self, config: &ProcessConfig, input: Value) -> RunReport {
        ProcessExecutor::new(self.steps.clone())
            .execute(config, input, self.shutdown.child_token())
            .await
    }

    /// Stop accepting work, cancel in-flight runs and wait for them to be recorded
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Dispatch loop ended abnormally: {}", e);
            }
        }
        tracing::info!("BPM runtime stopped");
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ProcessEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn configs(&self) -> &Arc<dyn ProcessConfigStore> {
        &self.configs
    }

    pub fn history(&self) -> &Arc<dyn InstanceRepository> {
        &self.history
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `None` runs every dispatched request immediately
    pub max_concurrent_runs: Option<usize>,
    pub event_buffer_size: usize,
    pub strict_step_types: bool,
    pub fallback_delay_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: None,
            event_buffer_size: 1000,
            strict_step_types: false,
            fallback_delay_ms: 50,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `BPM_MAX_CONCURRENT_RUNS`, `BPM_EVENT_BUFFER`
    /// and `BPM_STRICT_STEP_TYPES`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(max) = env_parse::<usize>("BPM_MAX_CONCURRENT_RUNS") {
            config.max_concurrent_runs = Some(max).filter(|m| *m > 0);
        }
        if let Some(size) = env_parse("BPM_EVENT_BUFFER") {
            config.event_buffer_size = size;
        }
        if let Some(strict) = env_parse("BPM_STRICT_STEP_TYPES") {
            config.strict_step_types = strict;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={}", key, raw);
            None
        }
    }
}
