//! Automated campaign runs: the execution controller, the per-campaign run
//! registry and the cooperative cancellation handle.

mod controller;
mod types;

pub use controller::ExecutionController;
pub use types::{RunError, RunHandle, RunRegistry};
