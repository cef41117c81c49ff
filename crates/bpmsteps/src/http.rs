use async_trait::async_trait;
use bpmcore::{HandlerMetadata, StepContext, StepError, StepHandler, StepOutcome};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Instant;
use tokio::time::Duration;

/// HTTP request step
pub struct HttpRequestStep {
    client: reqwest::Client,
}

impl HttpRequestStep {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestStep {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequestSettings {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    30
}

#[async_trait]
impl StepHandler for HttpRequestStep {
    fn step_type(&self) -> &str {
        "http-request"
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutcome, StepError> {
        let started = Instant::now();
        if ctx.settings.is_empty() {
            return Err(StepError::MissingSetting("url".to_string()));
        }
        let settings: HttpRequestSettings = ctx.parse_settings()?;
        if settings.url.trim().is_empty() {
            return Err(StepError::MissingSetting("url".to_string()));
        }

        let method = Method::from_bytes(settings.method.to_uppercase().as_bytes()).map_err(|_| {
            StepError::InvalidSetting {
                field: "method".to_string(),
                expected: "HTTP method".to_string(),
            }
        })?;

        ctx.events.info(format!("{} {}", method, settings.url));

        let mut request = self.client.request(method, &settings.url);
        if settings.timeout_seconds > 0 {
            request = request.timeout(Duration::from_secs(settings.timeout_seconds));
        }
        for (key, value) in &settings.headers {
            request = request.header(key, value);
        }
        if let Some(body) = settings.body.filter(|b| !b.is_empty()) {
            let content_type = settings
                .content_type
                .unwrap_or_else(|| "application/json".to_string());
            request = request.header(CONTENT_TYPE, content_type).body(body);
        }

        let response = tokio::select! {
            _ = ctx.cancellation.cancelled() => return Err(StepError::Cancelled),
            response = request.send() => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return Ok(StepOutcome::failure(format!("HTTP request failed: {}", e))
                    .with_duration(started.elapsed()))
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StepError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        tracing::info!(step_id = %ctx.step_id, status = status.as_u16(), "http request finished");
        ctx.events.info(format!("Response status: {}", status));

        Ok(StepOutcome::success(json!({
            "statusCode": status.as_u16(),
            "body": body,
            "isSuccess": status.is_success(),
        }))
        .with_duration(started.elapsed()))
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }
}
