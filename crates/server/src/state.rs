use std::sync::Arc;
use std::time::Duration;

use labelhub_core::{Config, Engine, HttpWorker, ItemWorker, WorkerError};

/// Shared application state
pub struct AppState {
    config: Config,
    engine: Arc<Engine>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<Engine>) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Builds the model worker for a campaign: the campaign's `api_url`
    /// wins over the service-wide default endpoint.
    pub fn build_worker(
        &self,
        campaign_config: &serde_json::Value,
    ) -> Result<Arc<dyn ItemWorker>, WorkerError> {
        let endpoint = HttpWorker::resolve_endpoint(
            campaign_config,
            self.config.worker.endpoint.as_deref(),
        )
        .ok_or_else(|| {
            WorkerError::Request(
                "no model endpoint configured (set worker.endpoint or the campaign's api_url)"
                    .to_string(),
            )
        })?;

        let worker = HttpWorker::new(
            &self.config.worker.name,
            endpoint,
            Duration::from_secs(self.config.worker.timeout_secs),
        )?;
        Ok(Arc::new(worker))
    }
}
