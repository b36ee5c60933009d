pub mod assignment;
pub mod broadcast;
pub mod campaign;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod runner;
pub mod testing;
pub mod worker;

pub use assignment::{
    AssignedBatch, AssignmentError, BatchSummary, ItemSummary, Overview, ServiceIdentity,
    SubmitReceipt,
};
pub use broadcast::{EventBody, ProgressBroadcaster, ProgressEvent};
pub use campaign::{
    CampaignError, CampaignKind, CampaignMeta, CampaignStats, CampaignStatus,
    CreateCampaignRequest, FsCampaignStore, ItemKey, ItemStatus, NewWorkItem, WorkItem,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ServerConfig,
    StorageConfig, WorkerConfig,
};
pub use engine::{CampaignSummary, Engine};
pub use runner::{RunError, RunHandle};
pub use worker::{HttpWorker, ItemWorker, WorkerError};
