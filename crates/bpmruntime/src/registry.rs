use bpmcore::{HandlerMetadata, ProcessError, StepHandler};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of step handlers, keyed case-insensitively by step type
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler; a second handler for the same type key is rejected
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) -> Result<(), ProcessError> {
        let step_type = handler.step_type().to_string();
        let key = normalize(&step_type);
        if key.is_empty() {
            return Err(ProcessError::Invalid("step handler with empty type".to_string()));
        }
        if self.handlers.contains_key(&key) {
            return Err(ProcessError::DuplicateHandler(step_type));
        }

        tracing::info!("Registering step type: {}", step_type);
        self.handlers.insert(key, handler);
        Ok(())
    }

    /// Find the handler for a step type
    pub fn resolve(&self, step_type: &str) -> Option<Arc<dyn StepHandler>> {
        if step_type.trim().is_empty() {
            tracing::warn!("handler requested for an empty step type");
            return None;
        }

        let handler = self.handlers.get(&normalize(step_type)).cloned();
        if handler.is_none() {
            tracing::warn!(
                "no handler for step type '{}'; available: {}",
                step_type,
                self.list_step_types().join(", ")
            );
        }
        handler
    }

    pub fn is_supported(&self, step_type: &str) -> bool {
        self.handlers.contains_key(&normalize(step_type))
    }

    /// Registered type keys as declared by their handlers, sorted
    pub fn list_step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .values()
            .map(|h| h.step_type().to_string())
            .collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, step_type: &str) -> Option<HandlerMetadata> {
        self.handlers.get(&normalize(step_type)).map(|h| h.metadata())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(step_type: &str) -> String {
    step_type.trim().to_lowercase()
}
