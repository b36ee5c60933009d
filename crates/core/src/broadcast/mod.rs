//! Per-campaign publish/subscribe for live run progress.
//!
//! One producer (the execution controller) fans out to zero or more
//! subscriber channels per campaign. Delivery is best-effort: a subscriber
//! that disconnects or falls behind its channel buffer is dropped so that
//! publishing never blocks. Within one channel events arrive in publish
//! order, each stamped with a per-campaign monotonically increasing
//! sequence number.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::campaign::ItemKey;
use crate::metrics::{EVENTS_PUBLISHED, SUBSCRIBERS_ACTIVE, SUBSCRIBERS_DROPPED};

/// Default per-subscriber channel buffer.
const DEFAULT_BUFFER: usize = 256;

/// Body of one progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    /// Completion counters after an item finished.
    Progress { finished: usize, total: usize },
    /// The output produced for one item.
    Result {
        dataset: String,
        split: String,
        setup_id: String,
        example_idx: usize,
        payload: serde_json::Value,
    },
    /// The run halted on a failure.
    Error { message: String },
    /// Terminal marker: every item of the campaign is finished.
    Done { finished: usize, total: usize },
}

impl EventBody {
    pub fn result(key: &ItemKey, payload: serde_json::Value) -> Self {
        EventBody::Result {
            dataset: key.dataset.clone(),
            split: key.split.clone(),
            setup_id: key.setup_id.clone(),
            example_idx: key.example_idx,
            payload,
        }
    }
}

/// One message on a subscriber channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub body: EventBody,
}

struct CampaignChannel {
    next_seq: u64,
    subscribers: Vec<mpsc::Sender<ProgressEvent>>,
}

impl CampaignChannel {
    fn new() -> Self {
        Self {
            next_seq: 0,
            subscribers: Vec::new(),
        }
    }
}

/// Fan-out hub for campaign progress events.
pub struct ProgressBroadcaster {
    buffer: usize,
    channels: Mutex<HashMap<String, CampaignChannel>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// Create a broadcaster with the given per-subscriber buffer size.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            buffer,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a new subscriber for the campaign. Succeeds even when no
    /// run is live; the channel simply stays silent until one starts.
    /// Dropping the receiver unsubscribes lazily on the next publish.
    pub fn subscribe(&self, campaign_id: &str) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(campaign_id.to_string())
            .or_insert_with(CampaignChannel::new)
            .subscribers
            .push(tx);
        SUBSCRIBERS_ACTIVE.inc();
        rx
    }

    /// Sends `body` to every subscriber of the campaign. A subscriber whose
    /// buffer is full or whose receiver is gone is removed; the rest are
    /// unaffected and publication never blocks.
    pub fn publish(&self, campaign_id: &str, body: EventBody) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels
            .entry(campaign_id.to_string())
            .or_insert_with(CampaignChannel::new);

        let event = ProgressEvent {
            seq: channel.next_seq,
            body,
        };
        channel.next_seq += 1;
        EVENTS_PUBLISHED.inc();

        channel.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Dropping lagging subscriber of campaign {}", campaign_id);
                SUBSCRIBERS_DROPPED.inc();
                SUBSCRIBERS_ACTIVE.dec();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Removing disconnected subscriber of campaign {}", campaign_id);
                SUBSCRIBERS_ACTIVE.dec();
                false
            }
        });
    }

    /// Currently registered subscribers for the campaign.
    pub fn subscriber_count(&self, campaign_id: &str) -> usize {
        self.channels
            .lock()
            .unwrap()
            .get(campaign_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    /// Drops the campaign's channel entirely (campaign deletion). All its
    /// subscribers see end-of-stream.
    pub fn remove_campaign(&self, campaign_id: &str) {
        if let Some(channel) = self.channels.lock().unwrap().remove(campaign_id) {
            SUBSCRIBERS_ACTIVE.sub(channel.subscribers.len() as i64);
        }
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
