use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const SOURCE_API: &str = "API";
pub const SOURCE_BROKER: &str = "Broker";
pub const SOURCE_CLI: &str = "CLI";

/// A request to run one process, consumed once by the dispatch loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Queue identity, never supplied by callers
    #[serde(skip, default = "Uuid::new_v4")]
    pub request_id: Uuid,
    #[serde(default)]
    pub process_public_id: String,
    #[serde(default, alias = "inputData")]
    pub input_arguments: Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Accepted but not used for ordering
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl StartRequest {
    pub fn new(process_public_id: impl Into<String>, input_arguments: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            process_public_id: process_public_id.into(),
            input_arguments,
            correlation_id: None,
            priority: 0,
            source: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Fill in a generated correlation id when the caller left it blank
    pub fn ensure_correlation_id(&mut self) -> &str {
        let missing = self
            .correlation_id
            .as_deref()
            .map_or(true, |id| id.trim().is_empty());
        if missing {
            self.correlation_id = Some(Uuid::new_v4().to_string());
        }
        self.correlation_id.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generates_correlation_id_only_when_missing() {
        let mut request = StartRequest::new("p1", json!({}));
        let generated = request.ensure_correlation_id().to_string();
        assert!(!generated.is_empty());
        assert_eq!(request.ensure_correlation_id(), generated);

        let mut explicit = StartRequest::new("p1", json!({})).with_correlation_id("abc");
        assert_eq!(explicit.ensure_correlation_id(), "abc");

        let mut blank = StartRequest::new("p1", json!({})).with_correlation_id("  ");
        assert_ne!(blank.ensure_correlation_id(), "  ");
    }

    #[test]
    fn decodes_broker_message_shape() {
        let request: StartRequest = serde_json::from_value(json!({
            "processPublicId": "order-process",
            "correlationId": "unique-id-123",
            "inputData": { "orderId": 123 }
        }))
        .unwrap();

        assert_eq!(request.process_public_id, "order-process");
        assert_eq!(request.correlation_id.as_deref(), Some("unique-id-123"));
        assert_eq!(request.input_arguments, json!({"orderId": 123}));
        assert_eq!(request.priority, 0);
    }
}
