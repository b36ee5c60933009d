//! Types for the automated run controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::campaign::{CampaignError, ItemKey};

/// Errors that can end or refuse an automated run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Runs only exist for automated campaigns.
    #[error("campaign {0} is not automated")]
    NotAutomated(String),

    /// Campaign store failure.
    #[error(transparent)]
    Campaign(#[from] CampaignError),

    /// The external worker call failed; the item was released back to
    /// free and the run halted.
    #[error("worker failed on item {key}: {message}")]
    Worker { key: ItemKey, message: String },
}

/// Handle to a live (or cancelled) run. Cheap to clone; all clones share
/// the cancel flag.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: String,
    cancel: Arc<AtomicBool>,
}

impl RunHandle {
    pub(crate) fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Requests cooperative cancellation. The loop observes the flag at
    /// its next iteration boundary; the in-flight item completes.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Registry of live runs keyed by campaign id. Enforces the
/// one-controller-per-campaign rule.
#[derive(Default)]
pub struct RunRegistry {
    inner: Mutex<HashMap<String, RunHandle>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing handle for the campaign, or registers a fresh
    /// one. The boolean is true when a new run was registered.
    pub fn register(&self, campaign_id: &str) -> (RunHandle, bool) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.get(campaign_id) {
            return (handle.clone(), false);
        }
        let handle = RunHandle::new();
        inner.insert(campaign_id.to_string(), handle.clone());
        (handle, true)
    }

    pub fn get(&self, campaign_id: &str) -> Option<RunHandle> {
        self.inner.lock().unwrap().get(campaign_id).cloned()
    }

    pub fn is_registered(&self, campaign_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(campaign_id)
    }

    /// Removes the campaign's entry, but only while it still belongs to
    /// `run_id`: a finished loop must not evict a successor run.
    pub fn deregister(&self, campaign_id: &str, run_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .get(campaign_id)
            .is_some_and(|h| h.run_id() == run_id)
        {
            inner.remove(campaign_id);
        }
    }

    /// Cancels every live run; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        for handle in inner.values() {
            handle.cancel();
        }
        inner.len()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }
}
