//! Testing utilities and mock implementations for engine tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use labelhub_core::testing::MockWorker;
//!
//! let worker = MockWorker::new();
//! worker.fail_on(3).await;
//! worker.set_result(0, serde_json::json!({"out": "sunny"})).await;
//!
//! // Hand to Engine::start as Arc<dyn ItemWorker>...
//! ```

mod mock_worker;

pub use mock_worker::{MockWorker, WorkerGate};
