//! Execution controller for automated campaign runs.
//!
//! One cooperative background task per running campaign. The loop walks the
//! table in order, assigning and finishing one item at a time; every
//! decision read and the resulting table rewrite happen inside the shared
//! exclusion lock, while the worker call and all event publication happen
//! outside it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broadcast::{EventBody, ProgressBroadcaster};
use crate::campaign::{
    item_output_filename, CampaignError, CampaignRecord, CampaignStatus, FsCampaignStore, ItemKey,
    ItemStatus,
};
use crate::metrics::{ITEMS_FINISHED, RUNS_STARTED, RUN_OUTCOMES};
use crate::worker::ItemWorker;

use super::types::{RunError, RunHandle, RunRegistry};

/// How a run loop ended.
enum RunOutcome {
    /// Every item finished; the campaign is done.
    Finished { finished: usize, total: usize },
    /// The cancel flag was observed; remaining items stay free.
    Paused,
}

/// Drives automated campaign runs. At most one live run per campaign id,
/// enforced through the shared registry.
pub struct ExecutionController {
    store: Arc<FsCampaignStore>,
    lock: Arc<Mutex<()>>,
    registry: Arc<RunRegistry>,
    broadcaster: Arc<ProgressBroadcaster>,
}

impl ExecutionController {
    pub fn new(
        store: Arc<FsCampaignStore>,
        lock: Arc<Mutex<()>>,
        registry: Arc<RunRegistry>,
        broadcaster: Arc<ProgressBroadcaster>,
    ) -> Self {
        Self {
            store,
            lock,
            registry,
            broadcaster,
        }
    }

    /// Starts a run for the campaign.
    ///
    /// Returns the existing handle when a run is already live (no-op), and
    /// `None` when no free work remains (also a no-op). Otherwise the
    /// campaign transitions to running and a background task takes over.
    pub async fn start(
        &self,
        campaign_id: &str,
        worker: Arc<dyn ItemWorker>,
    ) -> Result<Option<RunHandle>, RunError> {
        let handle = {
            let _guard = self.lock.lock().await;

            if let Some(handle) = self.registry.get(campaign_id) {
                debug!("Campaign {} already has a live run", campaign_id);
                return Ok(Some(handle));
            }

            let mut record = self.store.load(campaign_id)?;
            if !record.kind().is_automated() {
                return Err(RunError::NotAutomated(campaign_id.to_string()));
            }

            // A running status with no registered run is left over from a
            // crashed or orphaned loop.
            if record.meta.status == CampaignStatus::Running {
                info!(
                    "Campaign {} was marked running with no live run, resetting to idle",
                    campaign_id
                );
                record.meta.set_status(CampaignStatus::Idle).map_err(CampaignError::from)?;
                self.store.save_meta(&record.meta)?;
            }

            if !record.has_free() {
                info!("Campaign {} has no free items, run is a no-op", campaign_id);
                return Ok(None);
            }

            record
                .meta
                .set_status(CampaignStatus::Running)
                .map_err(CampaignError::from)?;
            self.store.save_meta(&record.meta)?;

            let (handle, _) = self.registry.register(campaign_id);
            handle
        };

        RUNS_STARTED.inc();
        info!("Starting run {} for campaign {}", handle.run_id(), campaign_id);

        let store = Arc::clone(&self.store);
        let lock = Arc::clone(&self.lock);
        let registry = Arc::clone(&self.registry);
        let broadcaster = Arc::clone(&self.broadcaster);
        let campaign_id = campaign_id.to_string();
        let loop_handle = handle.clone();

        tokio::spawn(async move {
            Self::run_loop(store, lock, registry, broadcaster, campaign_id, loop_handle, worker)
                .await;
        });

        Ok(Some(handle))
    }

    /// Requests a pause. The live run stops at its next iteration boundary
    /// (the in-flight item completes) and moves the campaign back to idle.
    /// Without a live run this only normalizes a stale running status.
    /// Returns whether a live run was signalled.
    pub async fn pause(&self, campaign_id: &str) -> Result<bool, RunError> {
        if let Some(handle) = self.registry.get(campaign_id) {
            info!("Pause requested for campaign {}", campaign_id);
            handle.cancel();
            return Ok(true);
        }

        let _guard = self.lock.lock().await;
        let mut record = self.store.load(campaign_id)?;
        if record.meta.status == CampaignStatus::Running {
            info!(
                "Campaign {} was marked running with no live run, resetting to idle",
                campaign_id
            );
            record
                .meta
                .set_status(CampaignStatus::Idle)
                .map_err(CampaignError::from)?;
            self.store.save_meta(&record.meta)?;
        }
        Ok(false)
    }

    pub fn is_running(&self, campaign_id: &str) -> bool {
        self.registry.is_registered(campaign_id)
    }

    /// Cancels all live runs and waits (bounded) for their loops to
    /// observe the flag and deregister.
    pub async fn shutdown(&self) {
        let cancelled = self.registry.cancel_all();
        if cancelled == 0 {
            return;
        }
        info!("Cancelling {} live runs", cancelled);
        for _ in 0..100 {
            if self.registry.active_ids().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        warn!(
            "Shutdown timed out waiting for runs: {:?}",
            self.registry.active_ids()
        );
    }

    /// Outer loop wrapper: runs the item loop, then publishes the terminal
    /// event and deregisters.
    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        store: Arc<FsCampaignStore>,
        lock: Arc<Mutex<()>>,
        registry: Arc<RunRegistry>,
        broadcaster: Arc<ProgressBroadcaster>,
        campaign_id: String,
        handle: RunHandle,
        worker: Arc<dyn ItemWorker>,
    ) {
        let outcome =
            Self::drive(&store, &lock, &broadcaster, &campaign_id, &handle, worker.as_ref()).await;

        match outcome {
            Ok(RunOutcome::Finished { finished, total }) => {
                info!("Run {} finished campaign {}", handle.run_id(), campaign_id);
                RUN_OUTCOMES.with_label_values(&["finished"]).inc();
                broadcaster.publish(&campaign_id, EventBody::Done { finished, total });
            }
            Ok(RunOutcome::Paused) => {
                info!("Run {} paused for campaign {}", handle.run_id(), campaign_id);
                RUN_OUTCOMES.with_label_values(&["paused"]).inc();
            }
            Err(e) => {
                warn!(
                    "Run {} for campaign {} halted: {}",
                    handle.run_id(),
                    campaign_id,
                    e
                );
                RUN_OUTCOMES.with_label_values(&["failed"]).inc();
                broadcaster.publish(
                    &campaign_id,
                    EventBody::Error {
                        message: e.to_string(),
                    },
                );
                // Worker failures reset the status inside the loop; a store
                // failure may leave the campaign marked running.
                if matches!(e, RunError::Campaign(_)) {
                    let _guard = lock.lock().await;
                    if let Ok(mut record) = store.load(&campaign_id) {
                        if record.meta.status == CampaignStatus::Running
                            && record.meta.set_status(CampaignStatus::Idle).is_ok()
                        {
                            let _ = store.save_meta(&record.meta);
                        }
                    }
                }
            }
        }

        registry.deregister(&campaign_id, handle.run_id());
    }

    /// The item loop. The cancel flag is polled once per iteration, before
    /// the next item is selected; cancellation is never preemptive.
    async fn drive(
        store: &FsCampaignStore,
        lock: &Mutex<()>,
        broadcaster: &ProgressBroadcaster,
        campaign_id: &str,
        handle: &RunHandle,
        worker: &dyn ItemWorker,
    ) -> Result<RunOutcome, RunError> {
        loop {
            if handle.is_cancelled() {
                let _guard = lock.lock().await;
                let mut record = store.load(campaign_id)?;
                record
                    .meta
                    .set_status(CampaignStatus::Idle)
                    .map_err(CampaignError::from)?;
                store.save_meta(&record.meta)?;
                return Ok(RunOutcome::Paused);
            }

            // Select and assign the next free item, or finalize.
            let (key, config) = {
                let _guard = lock.lock().await;
                let mut record = store.load(campaign_id)?;
                match record.first_free_index() {
                    None => {
                        record
                            .meta
                            .set_status(CampaignStatus::Finished)
                            .map_err(CampaignError::from)?;
                        store.save_meta(&record.meta)?;
                        return Ok(RunOutcome::Finished {
                            finished: record.finished_count(),
                            total: record.items.len(),
                        });
                    }
                    Some(idx) => {
                        record.items[idx]
                            .assign(worker.name(), Utc::now())
                            .map_err(CampaignError::from)?;
                        store.save_table(&record)?;
                        (record.items[idx].key(), record.meta.config.clone())
                    }
                }
            };

            debug!("Running item {} of campaign {}", key, campaign_id);
            match worker.run_item(&key, &config).await {
                Ok(payload) => {
                    let counts = {
                        let _guard = lock.lock().await;
                        let mut record = store.load(campaign_id)?;
                        Self::finish_item(store, &mut record, &key, worker.name(), &payload)?
                    };
                    if let Some((finished, total)) = counts {
                        broadcaster.publish(campaign_id, EventBody::result(&key, payload));
                        broadcaster
                            .publish(campaign_id, EventBody::Progress { finished, total });
                    }
                }
                Err(e) => {
                    {
                        let _guard = lock.lock().await;
                        let mut record = store.load(campaign_id)?;
                        if let Some(idx) = Self::find_assigned(&record, &key, worker.name()) {
                            record.items[idx].release().map_err(CampaignError::from)?;
                            store.save_table(&record)?;
                        }
                        record
                            .meta
                            .set_status(CampaignStatus::Idle)
                            .map_err(CampaignError::from)?;
                        store.save_meta(&record.meta)?;
                    }
                    return Err(RunError::Worker {
                        key,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Writes the output document and marks the item finished. Returns the
    /// updated completion counters, or `None` when the item is no longer
    /// assigned to this run (it was cleared while the worker was in
    /// flight); in that case nothing is persisted and the loop moves on.
    fn finish_item(
        store: &FsCampaignStore,
        record: &mut CampaignRecord,
        key: &ItemKey,
        worker_name: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<(usize, usize)>, RunError> {
        let Some(idx) = Self::find_assigned(record, key, worker_name) else {
            warn!(
                "Item {} of campaign {} changed while the worker ran, discarding its result",
                key,
                record.id()
            );
            return Ok(None);
        };

        let now = Utc::now();
        let doc = serde_json::json!({
            "dataset": key.dataset,
            "split": key.split,
            "setup_id": key.setup_id,
            "example_idx": key.example_idx,
            "annotator_id": worker_name,
            "payload": payload,
        });
        store.write_output(
            record.id(),
            &item_output_filename(&record.items[idx], now.timestamp()),
            &[doc],
        )?;

        record.items[idx].finish(now).map_err(CampaignError::from)?;
        store.save_table(record)?;
        ITEMS_FINISHED.inc();

        Ok(Some((record.finished_count(), record.items.len())))
    }

    fn find_assigned(record: &CampaignRecord, key: &ItemKey, worker_name: &str) -> Option<usize> {
        record.items.iter().position(|it| {
            it.status == ItemStatus::Assigned && it.annotator_id == worker_name && it.key() == *key
        })
    }
}
