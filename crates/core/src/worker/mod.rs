//! Item workers: the opaque model-execution functions driven by automated
//! campaign runs.

mod http;
mod traits;

pub use http::HttpWorker;
pub use traits::{ItemWorker, WorkerError};
