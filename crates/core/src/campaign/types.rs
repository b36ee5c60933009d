//! Core campaign and work-item data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Illegal lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// Campaign status transition that is not part of the lifecycle.
    #[error("illegal campaign transition: {from} -> {to}")]
    Campaign {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    /// Work-item status transition that is not part of the lifecycle.
    #[error("illegal item transition: {from} -> {to}")]
    Item { from: ItemStatus, to: ItemStatus },
}

/// Campaign lifecycle status.
///
/// `Idle -> Running` on run start, `Running -> Idle` on pause (or stale-run
/// recovery), `Running | Idle -> Finished` when no free or assigned work
/// remains, `Finished -> Idle` when any output is cleared. A finished
/// campaign never goes directly back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Idle,
    Running,
    Finished,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Idle => "idle",
            CampaignStatus::Running => "running",
            CampaignStatus::Finished => "finished",
        }
    }

    /// Checks that `self -> to` is a legal lifecycle step. Self-transitions
    /// are accepted as no-ops.
    pub fn transition(self, to: CampaignStatus) -> Result<CampaignStatus, TransitionError> {
        use CampaignStatus::*;
        match (self, to) {
            (from, to) if from == to => Ok(to),
            (Idle, Running) | (Idle, Finished) => Ok(to),
            (Running, Idle) | (Running, Finished) => Ok(to),
            (Finished, Idle) => Ok(to),
            (from, to) => Err(TransitionError::Campaign { from, to }),
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work-item lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Free,
    Assigned,
    Finished,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Free => "free",
            ItemStatus::Assigned => "assigned",
            ItemStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What drives a campaign: human annotators, an automated model run, or an
/// externally produced set of outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    /// Crowdsourced annotation; items are grouped into batches and handed
    /// out to annotators one batch at a time.
    Human,
    /// Automated evaluation of existing model outputs.
    AutoEval,
    /// Automated output generation.
    AutoGen,
    /// Outputs imported from elsewhere; no assignment or run path.
    External,
}

impl CampaignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignKind::Human => "human",
            CampaignKind::AutoEval => "auto_eval",
            CampaignKind::AutoGen => "auto_gen",
            CampaignKind::External => "external",
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, CampaignKind::Human)
    }

    pub fn is_automated(&self) -> bool {
        matches!(self, CampaignKind::AutoEval | CampaignKind::AutoGen)
    }
}

impl fmt::Display for CampaignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one unit of work: a single example of a dataset split,
/// optionally tied to the model setup that produced the output under
/// annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub dataset: String,
    pub split: String,
    pub setup_id: String,
    pub example_idx: usize,
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.dataset, self.split, self.setup_id, self.example_idx
        )
    }
}

/// One row of a campaign's persisted work-item table.
///
/// `batch_idx` and `annotator_group` are present for human campaigns only;
/// automated campaigns treat every item as its own unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub dataset: String,
    pub split: String,
    pub setup_id: String,
    pub example_idx: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_idx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotator_group: Option<u32>,
    pub status: ItemStatus,
    #[serde(default)]
    pub annotator_id: String,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            dataset: self.dataset.clone(),
            split: self.split.clone(),
            setup_id: self.setup_id.clone(),
            example_idx: self.example_idx,
        }
    }

    /// `Free -> Assigned`; records the annotator and the assignment time.
    pub fn assign(
        &mut self,
        annotator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != ItemStatus::Free {
            return Err(TransitionError::Item {
                from: self.status,
                to: ItemStatus::Assigned,
            });
        }
        self.status = ItemStatus::Assigned;
        self.annotator_id = annotator_id.to_string();
        self.start = Some(now);
        self.end = None;
        Ok(())
    }

    /// `Assigned -> Finished`; records the completion time.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != ItemStatus::Assigned {
            return Err(TransitionError::Item {
                from: self.status,
                to: ItemStatus::Finished,
            });
        }
        self.status = ItemStatus::Finished;
        self.end = Some(now);
        Ok(())
    }

    /// `Assigned | Finished -> Free`; wipes the annotator and both
    /// timestamps so the item can be handed out again.
    pub fn release(&mut self) -> Result<(), TransitionError> {
        if self.status == ItemStatus::Free {
            return Err(TransitionError::Item {
                from: self.status,
                to: ItemStatus::Free,
            });
        }
        self.status = ItemStatus::Free;
        self.annotator_id = String::new();
        self.start = None;
        self.end = None;
        Ok(())
    }
}

/// Campaign metadata document, persisted as `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignMeta {
    pub id: String,
    #[serde(rename = "source")]
    pub kind: CampaignKind,
    pub config: serde_json::Value,
    pub created: DateTime<Utc>,
    pub status: CampaignStatus,
}

impl CampaignMeta {
    pub fn new(id: &str, kind: CampaignKind, config: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            kind,
            config,
            created: Utc::now(),
            status: CampaignStatus::Idle,
        }
    }

    /// Applies a status change through the state machine.
    pub fn set_status(&mut self, to: CampaignStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition(to)?;
        Ok(())
    }
}

/// Progress counts over a campaign's units of work (batches for human
/// campaigns, items for automated ones).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total: usize,
    pub free: usize,
    pub assigned: usize,
    pub finished: usize,
}
