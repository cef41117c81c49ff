use crate::graph::ProcessGraph;
use async_trait::async_trait;
use bpmcore::{
    EngineError, InstanceRepository, ProcessConfig, ProcessConfigStore, ProcessError,
    ProcessInstance, Result,
};
use chrono::Utc;
use std::cmp::Reverse;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Upper bound on history entries returned per process
pub const HISTORY_LIMIT: usize = 100;

/// Check a definition before it is stored.
///
/// Rejects a blank public id or name, an empty step list, blank step ids,
/// duplicate ids, references to unknown steps, cycles, and a start step that
/// cannot be resolved.
pub fn validate_config(config: &ProcessConfig) -> std::result::Result<(), ProcessError> {
    if config.public_id.trim().is_empty() {
        return Err(ProcessError::Invalid("publicId is required".to_string()));
    }
    if config.name.trim().is_empty() {
        return Err(ProcessError::Invalid(format!(
            "name is required for process {}",
            config.public_id
        )));
    }
    if config.steps.is_empty() {
        return Err(ProcessError::Invalid(format!(
            "process {} must have at least one step",
            config.public_id
        )));
    }
    if let Some(step) = config.steps.iter().find(|s| s.public_id.trim().is_empty()) {
        return Err(ProcessError::Invalid(format!(
            "step '{}' in process {} has no publicId",
            step.name, config.public_id
        )));
    }

    ProcessGraph::build(config)?.start_step(config)?;
    Ok(())
}

/// Process definitions held in memory, keyed by public id
#[derive(Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<HashMap<String, ProcessConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessConfigStore for InMemoryConfigStore {
    async fn get_by_public_id(&self, public_id: &str) -> Result<Option<ProcessConfig>> {
        Ok(self.configs.read().await.get(public_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<ProcessConfig>> {
        let mut active: Vec<ProcessConfig> = self
            .configs
            .read()
            .await
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.public_id.cmp(&b.public_id));
        Ok(active)
    }

    async fn create(&self, mut config: ProcessConfig) -> Result<ProcessConfig> {
        validate_config(&config)?;

        let mut configs = self.configs.write().await;
        if configs.contains_key(&config.public_id) {
            return Err(ProcessError::AlreadyExists(config.public_id).into());
        }

        config.created_at = Utc::now();
        config.updated_at = None;
        tracing::info!(process_id = %config.public_id, steps = config.steps.len(), "Process definition created");
        configs.insert(config.public_id.clone(), config.clone());
        Ok(config)
    }

    async fn update(&self, mut config: ProcessConfig) -> Result<ProcessConfig> {
        validate_config(&config)?;

        let mut configs = self.configs.write().await;
        let existing = configs
            .get(&config.public_id)
            .ok_or_else(|| ProcessError::NotFound(config.public_id.clone()))?;

        config.id = existing.id;
        config.created_at = existing.created_at;
        config.version = existing.version + 1;
        config.updated_at = Some(Utc::now());
        tracing::info!(process_id = %config.public_id, version = config.version, "Process definition updated");
        configs.insert(config.public_id.clone(), config.clone());
        Ok(config)
    }

    async fn delete(&self, public_id: &str) -> Result<bool> {
        let removed = self.configs.write().await.remove(public_id).is_some();
        if removed {
            tracing::info!(process_id = public_id, "Process definition deleted");
        }
        Ok(removed)
    }

    async fn exists(&self, public_id: &str) -> Result<bool> {
        Ok(self.configs.read().await.contains_key(public_id))
    }
}

/// Run history held in memory
#[derive(Default)]
pub struct InMemoryInstanceStore {
    instances: RwLock<HashMap<Uuid, ProcessInstance>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    async fn newest_first<F>(&self, filter: F, limit: usize) -> Vec<ProcessInstance>
    where
        F: Fn(&ProcessInstance) -> bool,
    {
        let mut matching: Vec<ProcessInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| filter(i))
            .cloned()
            .collect();
        matching.sort_by_key(|i| Reverse(i.created_at));
        matching.truncate(limit);
        matching
    }
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceStore {
    async fn create(&self, instance: &ProcessInstance) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.instance_id) {
            return Err(EngineError::Repository(format!(
                "instance {} already recorded",
                instance.instance_id
            )));
        }
        instances.insert(instance.instance_id, instance.clone());
        Ok(())
    }

    async fn update(&self, instance: &ProcessInstance) -> Result<()> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(&instance.instance_id) {
            Some(existing) => {
                *existing = instance.clone();
                Ok(())
            }
            None => Err(EngineError::Repository(format!(
                "instance {} not found",
                instance.instance_id
            ))),
        }
    }

    async fn get_by_instance_id(&self, instance_id: Uuid) -> Result<Option<ProcessInstance>> {
        Ok(self.instances.read().await.get(&instance_id).cloned())
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<ProcessInstance>> {
        Ok(self
            .newest_first(|i| i.correlation_id.as_deref() == Some(correlation_id), 1)
            .await
            .pop())
    }

    async fn list_by_process(&self, process_public_id: &str) -> Result<Vec<ProcessInstance>> {
        Ok(self
            .newest_first(|i| i.process_public_id == process_public_id, HISTORY_LIMIT)
            .await)
    }

    async fn recent(&self, count: usize) -> Result<Vec<ProcessInstance>> {
        Ok(self.newest_first(|_| true, count).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpmcore::{RunStatus, StartRequest, StepConfig};
    use chrono::Duration;
    use serde_json::json;

    fn valid() -> ProcessConfig {
        ProcessConfig::new("orders", "Orders")
            .with_step(StepConfig::new("a", "sample").with_next(["b"]))
            .with_step(StepConfig::new("b", "sample"))
    }

    #[test]
    fn validation_rules() {
        assert!(validate_config(&valid()).is_ok());

        let mut blank = valid();
        blank.public_id = " ".to_string();
        assert!(matches!(validate_config(&blank), Err(ProcessError::Invalid(_))));

        let no_steps = ProcessConfig::new("p", "P");
        assert!(matches!(validate_config(&no_steps), Err(ProcessError::Invalid(_))));

        let bad_start = valid().with_start_step("zzz");
        assert!(matches!(
            validate_config(&bad_start),
            Err(ProcessError::StartStepNotFound { .. })
        ));

        let dangling = valid().with_step(StepConfig::new("c", "sample").with_next(["nope"]));
        assert!(matches!(
            validate_config(&dangling),
            Err(ProcessError::UnknownStep { .. })
        ));
    }

    #[tokio::test]
    async fn config_crud() {
        let store = InMemoryConfigStore::new();
        let created = store.create(valid()).await.unwrap();
        assert_eq!(created.version, 1);
        assert!(store.exists("orders").await.unwrap());

        let err = store.create(valid()).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let updated = store.update(valid().inactive()).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.id, created.id);
        assert!(updated.updated_at.is_some());
        assert!(store.list_active().await.unwrap().is_empty());

        assert!(store.update(ProcessConfig::new("ghost", "G").with_step(StepConfig::new("a", "x"))).await.is_err());

        assert!(store.delete("orders").await.unwrap());
        assert!(!store.delete("orders").await.unwrap());
        assert!(store.get_by_public_id("orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_queries_are_newest_first() {
        let store = InMemoryInstanceStore::new();
        let now = Utc::now();

        for (i, pid) in ["p1", "p2", "p1"].iter().enumerate() {
            let mut request = StartRequest::new(*pid, json!({})).with_correlation_id(format!("c{}", i));
            request.created_at = now + Duration::seconds(i as i64);
            store.create(&ProcessInstance::pending(&request)).await.unwrap();
        }

        let p1 = store.list_by_process("p1").await.unwrap();
        assert_eq!(p1.len(), 2);
        assert_eq!(p1[0].correlation_id.as_deref(), Some("c2"));

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].correlation_id.as_deref(), Some("c1"));

        let mut found = store.get_by_correlation_id("c1").await.unwrap().unwrap();
        assert_eq!(found.process_public_id, "p2");

        found.mark_running();
        store.update(&found).await.unwrap();
        let reloaded = store.get_by_instance_id(found.instance_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, RunStatus::Running);

        assert!(store.create(&found).await.is_err());
    }
}
