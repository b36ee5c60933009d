//! Types for the exclusive-assignment protocol and progress views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::campaign::{CampaignError, ItemStatus, WorkItem};

/// Errors on the human assignment path.
#[derive(Debug, Error)]
pub enum AssignmentError {
    /// Submission for a batch that is not currently assigned to the
    /// claimed identity (stale or replayed). Rejected with no state change.
    #[error("batch {batch_idx} is not assigned to {annotator_id}")]
    Mismatch { batch_idx: u32, annotator_id: String },

    /// Batch assignment and submission only exist for human campaigns.
    #[error("campaign {0} is not a human campaign")]
    NotHuman(String),

    /// Campaign store failure.
    #[error(transparent)]
    Campaign(#[from] CampaignError),
}

/// Who is asking for work. The annotator id comes from the crowdsourcing
/// service; the group, when present, restricts which batches the requester
/// may receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub annotator_id: String,
    #[serde(default)]
    pub annotator_group: Option<u32>,
}

/// Identity of one example inside an assigned batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleRef {
    pub dataset: String,
    pub split: String,
    pub setup_id: String,
    pub example_idx: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator_group: Option<u32>,
}

impl From<&WorkItem> for ExampleRef {
    fn from(it: &WorkItem) -> Self {
        Self {
            dataset: it.dataset.clone(),
            split: it.split.clone(),
            setup_id: it.setup_id.clone(),
            example_idx: it.example_idx,
            annotator_group: it.annotator_group,
        }
    }
}

/// One batch handed out to an annotator session.
#[derive(Debug, Clone, Serialize)]
pub struct AssignedBatch {
    pub campaign_id: String,
    pub batch_idx: u32,
    pub annotator_id: String,
    pub examples: Vec<ExampleRef>,
}

/// Per-batch row of a human campaign overview.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_idx: u32,
    pub dataset: String,
    pub split: String,
    pub setup_id: String,
    pub example_cnt: usize,
    pub status: ItemStatus,
    pub annotator_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotator_group: Option<u32>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub example_details: Vec<ExampleRef>,
}

/// Per-item row of an automated campaign overview, with the finished
/// output joined in by identity key when one exists.
#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    #[serde(flatten)]
    pub item: WorkItem,
    pub output: Option<Value>,
}

/// Read-only progress view of a campaign.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Overview {
    Batches(Vec<BatchSummary>),
    Items(Vec<ItemSummary>),
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub batch_idx: u32,
    pub items_finished: usize,
    pub campaign_finished: bool,
    pub output_file: String,
}
