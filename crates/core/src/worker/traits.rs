//! The seam between the orchestration engine and whatever actually
//! produces outputs for automated campaigns.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::campaign::ItemKey;

/// Error type for worker invocations.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The call to the model backend failed (transport, timeout, non-2xx).
    #[error("worker request failed: {0}")]
    Request(String),

    /// The backend answered but the payload was unusable.
    #[error("worker returned an invalid payload: {0}")]
    InvalidPayload(String),
}

/// Produces the output for a single work item.
///
/// The engine treats this as an opaque function: it hands over the item
/// identity plus the campaign's configuration and receives either a JSON
/// payload or an error. Timeouts and retries against the backend are the
/// implementation's concern; the engine only reacts to the outcome.
#[async_trait]
pub trait ItemWorker: Send + Sync {
    /// Identity recorded as `annotator_id` on items this worker processes.
    fn name(&self) -> &str;

    /// Runs one item. The campaign config is passed through uninterpreted.
    async fn run_item(&self, key: &ItemKey, config: &Value) -> Result<Value, WorkerError>;
}
