//! The orchestration engine: one explicitly constructed context object
//! holding the campaign store, the global exclusion lock, the run registry
//! and the progress broadcaster.
//!
//! Every control operation goes through here. All table-mutating paths
//! (batch assignment, submission, clears, and the automated run loop)
//! serialize on the single lock, and every decision read shares a critical
//! section with its resulting write, so two concurrent requests can never
//! assign the same unit of work. Progress events are always published
//! after the lock is released.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::assignment::coordinator;
use crate::assignment::{
    AssignedBatch, AssignmentError, Overview, ServiceIdentity, SubmitReceipt,
};
use crate::broadcast::{ProgressBroadcaster, ProgressEvent};
use crate::campaign::{
    batch_output_filename, CampaignError, CampaignKind, CampaignMeta, CampaignRecord,
    CampaignStats, CampaignStatus, CreateCampaignRequest, FsCampaignStore,
};
use crate::metrics::{BATCHES_ASSIGNED, ITEMS_FINISHED, SUBMISSIONS};
use crate::runner::{ExecutionController, RunError, RunHandle, RunRegistry};
use crate::worker::ItemWorker;

/// Campaign listing entry: metadata plus progress counts.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignSummary {
    #[serde(flatten)]
    pub meta: CampaignMeta,
    pub stats: CampaignStats,
}

pub struct Engine {
    store: Arc<FsCampaignStore>,
    lock: Arc<Mutex<()>>,
    registry: Arc<RunRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
    controller: ExecutionController,
}

impl Engine {
    pub fn new(store: FsCampaignStore) -> Self {
        let store = Arc::new(store);
        let lock = Arc::new(Mutex::new(()));
        let registry = Arc::new(RunRegistry::new());
        let broadcaster = Arc::new(ProgressBroadcaster::new());
        let controller = ExecutionController::new(
            Arc::clone(&store),
            Arc::clone(&lock),
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
        );
        Self {
            store,
            lock,
            registry,
            broadcaster,
            controller,
        }
    }

    pub fn store(&self) -> &FsCampaignStore {
        &self.store
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.broadcaster
    }

    /// Creates a campaign with all items free.
    pub async fn create(
        &self,
        request: CreateCampaignRequest,
    ) -> Result<CampaignMeta, CampaignError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.create(request)?.meta)
    }

    /// All campaigns, newest first, with their progress counts.
    pub async fn list(&self) -> Result<Vec<CampaignSummary>, CampaignError> {
        let _guard = self.lock.lock().await;
        let mut summaries = Vec::new();
        for meta in self.store.list()? {
            match self.load_healed(&meta.id) {
                Ok(record) => summaries.push(CampaignSummary {
                    stats: record.stats(),
                    meta: record.meta,
                }),
                Err(e) => warn!("Skipping campaign {} in listing: {}", meta.id, e),
            }
        }
        Ok(summaries)
    }

    pub async fn meta(&self, id: &str) -> Result<CampaignMeta, CampaignError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_healed(id)?.meta)
    }

    /// Replaces the campaign's opaque configuration.
    pub async fn update_config(
        &self,
        id: &str,
        config: Value,
    ) -> Result<CampaignMeta, CampaignError> {
        let _guard = self.lock.lock().await;
        let mut record = self.store.load(id)?;
        record.meta.config = config;
        self.store.save_meta(&record.meta)?;
        Ok(record.meta)
    }

    /// Hands the first eligible free batch to the requester, or `None`
    /// when the pool is exhausted (not an error; callers render a closed
    /// state).
    pub async fn request_batch(
        &self,
        id: &str,
        identity: &ServiceIdentity,
    ) -> Result<Option<AssignedBatch>, AssignmentError> {
        let _guard = self.lock.lock().await;
        let mut record = self.store.load(id)?;
        if !record.kind().is_human() {
            return Err(AssignmentError::NotHuman(id.to_string()));
        }

        let Some(batch_idx) = coordinator::eligible_batch(&record, identity) else {
            return Ok(None);
        };
        let batch =
            coordinator::assign_batch(&mut record, batch_idx, &identity.annotator_id, Utc::now())
                .map_err(AssignmentError::from)?;
        self.store.save_table(&record)?;

        BATCHES_ASSIGNED.inc();
        info!(
            "Assigned batch {} of campaign {} to {}",
            batch_idx, id, identity.annotator_id
        );
        Ok(Some(batch))
    }

    /// Accepts a finished batch: verifies ownership, writes the rows as
    /// one immutable output document, finishes the batch and, when it was
    /// the last open work, the whole campaign.
    pub async fn submit(
        &self,
        id: &str,
        batch_idx: u32,
        annotator_id: &str,
        rows: Vec<Value>,
    ) -> Result<SubmitReceipt, AssignmentError> {
        let _guard = self.lock.lock().await;
        let mut record = self.store.load(id)?;
        if !record.kind().is_human() {
            return Err(AssignmentError::NotHuman(id.to_string()));
        }

        if let Err(e) = coordinator::verify_batch_owner(&record, batch_idx, annotator_id) {
            SUBMISSIONS.with_label_values(&["mismatch"]).inc();
            warn!(
                "Rejected submission for batch {} of campaign {}: {}",
                batch_idx, id, e
            );
            return Err(e);
        }

        let now = Utc::now();
        let filename = batch_output_filename(batch_idx, annotator_id, now.timestamp());
        self.store
            .write_output(id, &filename, &rows)
            .map_err(AssignmentError::from)?;

        let items_finished = coordinator::finish_batch(&mut record, batch_idx, now)
            .map_err(AssignmentError::from)?;
        let campaign_finished = !record.has_unfinished();
        if campaign_finished {
            record
                .meta
                .set_status(CampaignStatus::Finished)
                .map_err(CampaignError::from)?;
            self.store.save_meta(&record.meta)?;
        }
        self.store.save_table(&record)?;

        SUBMISSIONS.with_label_values(&["accepted"]).inc();
        ITEMS_FINISHED.inc_by(items_finished as u64);
        info!(
            "Annotations for batch {} of campaign {} saved ({} items)",
            batch_idx, id, items_finished
        );
        Ok(SubmitReceipt {
            batch_idx,
            items_finished,
            campaign_finished,
            output_file: filename,
        })
    }

    /// Read-only progress view: per-batch rows for human campaigns,
    /// per-item rows with joined outputs otherwise.
    pub async fn overview(&self, id: &str) -> Result<Overview, CampaignError> {
        let _guard = self.lock.lock().await;
        let record = self.load_healed(id)?;
        match record.kind() {
            CampaignKind::Human => Ok(Overview::Batches(coordinator::human_overview(&record))),
            _ => {
                let outputs = self.store.finished_outputs(id)?;
                Ok(Overview::Items(coordinator::item_overview(&record, &outputs)))
            }
        }
    }

    pub async fn stats(&self, id: &str) -> Result<CampaignStats, CampaignError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_healed(id)?.stats())
    }

    /// Resets one unit of work to free: a batch for human campaigns, a
    /// single example otherwise. A finished campaign drops back to idle.
    /// The unit's previous output document is left in place; the next
    /// submission supersedes it. Returns how many items were released.
    pub async fn clear(&self, id: &str, idx: usize) -> Result<usize, CampaignError> {
        let _guard = self.lock.lock().await;
        let mut record = self.store.load(id)?;

        let released = if record.kind().is_human() {
            coordinator::release_items(&mut record, |it| it.batch_idx == Some(idx as u32))
        } else {
            coordinator::release_items(&mut record, |it| it.example_idx == idx)
        };
        self.store.save_table(&record)?;

        if record.meta.status == CampaignStatus::Finished {
            record
                .meta
                .set_status(CampaignStatus::Idle)
                .map_err(CampaignError::from)?;
            self.store.save_meta(&record.meta)?;
        }
        info!("Cleared {} items of campaign {} (idx {})", released, id, idx);
        Ok(released)
    }

    /// Resets every item to free and deletes all output documents.
    pub async fn clear_all(&self, id: &str) -> Result<(), CampaignError> {
        let _guard = self.lock.lock().await;
        let mut record = self.store.load(id)?;

        coordinator::release_items(&mut record, |_| true);
        self.store.clear_outputs(id)?;
        self.store.save_table(&record)?;

        if record.meta.status != CampaignStatus::Idle {
            record
                .meta
                .set_status(CampaignStatus::Idle)
                .map_err(CampaignError::from)?;
            self.store.save_meta(&record.meta)?;
        }
        info!("Cleared all outputs of campaign {}", id);
        Ok(())
    }

    /// Deletes the campaign wholesale. A live run is cancelled first; its
    /// loop ends on the next boundary when the store is gone.
    pub async fn delete(&self, id: &str) -> Result<(), CampaignError> {
        if let Some(handle) = self.registry.get(id) {
            handle.cancel();
        }
        let _guard = self.lock.lock().await;
        self.store.delete(id)?;
        self.broadcaster.remove_campaign(id);
        Ok(())
    }

    /// Starts an automated run. See [`ExecutionController::start`].
    pub async fn start(
        &self,
        id: &str,
        worker: Arc<dyn ItemWorker>,
    ) -> Result<Option<RunHandle>, RunError> {
        self.controller.start(id, worker).await
    }

    /// Pauses a live run (cooperatively). See [`ExecutionController::pause`].
    pub async fn pause(&self, id: &str) -> Result<bool, RunError> {
        self.controller.pause(id).await
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.controller.is_running(id)
    }

    /// Registers a progress subscriber. Always succeeds; the channel stays
    /// silent until a run publishes.
    pub fn subscribe(&self, id: &str) -> mpsc::Receiver<ProgressEvent> {
        self.broadcaster.subscribe(id)
    }

    /// Cancels all live runs and waits for their loops to drain.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }

    /// Loads a campaign and heals a stale running status: `running` with
    /// no registered run means the process (or loop) died mid-run. Caller
    /// must hold the exclusion lock.
    fn load_healed(&self, id: &str) -> Result<CampaignRecord, CampaignError> {
        let mut record = self.store.load(id)?;
        if record.meta.status == CampaignStatus::Running && !self.registry.is_registered(id) {
            info!(
                "Campaign {} was marked running with no live run, resetting to idle",
                id
            );
            record
                .meta
                .set_status(CampaignStatus::Idle)
                .map_err(CampaignError::from)?;
            self.store.save_meta(&record.meta)?;
        }
        Ok(record)
    }
}
