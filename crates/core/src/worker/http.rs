//! HTTP-backed item worker.
//!
//! Delegates each work item to an external model service: POSTs the item
//! identity together with the campaign configuration and uses the JSON
//! response body as the item's output payload.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::traits::{ItemWorker, WorkerError};
use crate::campaign::ItemKey;

pub struct HttpWorker {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpWorker {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::Request(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client,
        })
    }

    /// Picks the model endpoint for a campaign: an `api_url` in the
    /// campaign config wins over the service-wide default.
    pub fn resolve_endpoint(config: &Value, default: Option<&str>) -> Option<String> {
        config
            .get("api_url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| default.map(str::to_string))
    }
}

#[async_trait]
impl ItemWorker for HttpWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_item(&self, key: &ItemKey, config: &Value) -> Result<Value, WorkerError> {
        debug!("Dispatching item {} to {}", key, self.endpoint);

        let body = json!({
            "dataset": key.dataset,
            "split": key.split,
            "setup_id": key.setup_id,
            "example_idx": key.example_idx,
            "config": config,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkerError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WorkerError::Request(format!(
                "model service returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| WorkerError::InvalidPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_endpoint_prefers_campaign_config() {
        let config = json!({"api_url": "http://models.internal/run"});
        assert_eq!(
            HttpWorker::resolve_endpoint(&config, Some("http://default/run")),
            Some("http://models.internal/run".to_string())
        );
    }

    #[test]
    fn test_resolve_endpoint_falls_back_to_default() {
        let config = json!({"model": "mistral-7b"});
        assert_eq!(
            HttpWorker::resolve_endpoint(&config, Some("http://default/run")),
            Some("http://default/run".to_string())
        );
        assert_eq!(HttpWorker::resolve_endpoint(&config, None), None);
    }

    #[test]
    fn test_worker_name() {
        let worker =
            HttpWorker::new("gpt-judge", "http://localhost:9000/run", Duration::from_secs(5))
                .unwrap();
        assert_eq!(worker.name(), "gpt-judge");
    }
}
