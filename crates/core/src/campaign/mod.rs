//! Campaign state: lifecycle types, the persisted work-item table and the
//! filesystem store holding one directory per campaign.

mod record;
mod store;
mod table;
mod types;

pub use record::CampaignRecord;
pub use store::{
    batch_output_filename, item_output_filename, CampaignError, CreateCampaignRequest,
    FsCampaignStore, NewWorkItem,
};
pub use table::{load_table, rewrite_table};
pub use types::{
    CampaignKind, CampaignMeta, CampaignStats, CampaignStatus, ItemKey, ItemStatus,
    TransitionError, WorkItem,
};
