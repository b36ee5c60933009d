//! Mock item worker with scripted outcomes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::campaign::ItemKey;
use crate::worker::{ItemWorker, WorkerError};

struct Gate {
    started_tx: mpsc::Sender<ItemKey>,
    release_rx: Mutex<mpsc::Receiver<()>>,
}

/// Test-side handle to a gated [`MockWorker`]: observe which item the
/// worker picked up, then decide when it may complete. This makes
/// pause-at-a-boundary tests deterministic.
pub struct WorkerGate {
    started_rx: mpsc::Receiver<ItemKey>,
    release_tx: mpsc::Sender<()>,
}

impl WorkerGate {
    /// Waits until the worker has started an item and returns its key.
    pub async fn started(&mut self) -> ItemKey {
        self.started_rx
            .recv()
            .await
            .expect("worker gate closed before an item started")
    }

    /// Lets the in-flight item complete.
    pub async fn release(&self) {
        self.release_tx
            .send(())
            .await
            .expect("worker gate closed before release");
    }
}

/// Mock implementation of [`ItemWorker`] for engine tests.
pub struct MockWorker {
    name: String,
    results: Mutex<HashMap<usize, Value>>,
    fail_on: Mutex<HashSet<usize>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<ItemKey>>,
    gate: Option<Gate>,
}

impl MockWorker {
    pub fn new() -> Self {
        Self {
            name: "mock-worker".to_string(),
            results: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// A worker that blocks on every item until the returned gate
    /// releases it.
    pub fn gated() -> (Self, WorkerGate) {
        let (started_tx, started_rx) = mpsc::channel(32);
        let (release_tx, release_rx) = mpsc::channel(32);
        let mut worker = Self::new();
        worker.gate = Some(Gate {
            started_tx,
            release_rx: Mutex::new(release_rx),
        });
        (
            worker,
            WorkerGate {
                started_rx,
                release_tx,
            },
        )
    }

    /// Scripts the payload returned for a given example index.
    pub async fn set_result(&self, example_idx: usize, payload: Value) {
        self.results.lock().await.insert(example_idx, payload);
    }

    /// Makes the worker fail on a given example index.
    pub async fn fail_on(&self, example_idx: usize) {
        self.fail_on.lock().await.insert(example_idx);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.lock().await = delay;
    }

    /// Every item the worker was invoked for, in call order.
    pub async fn calls(&self) -> Vec<ItemKey> {
        self.calls.lock().await.clone()
    }
}

impl Default for MockWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemWorker for MockWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_item(&self, key: &ItemKey, _config: &Value) -> Result<Value, WorkerError> {
        self.calls.lock().await.push(key.clone());

        if let Some(gate) = &self.gate {
            // A closed gate (the test dropped its handle) lets items pass.
            let _ = gate.started_tx.send(key.clone()).await;
            let _ = gate.release_rx.lock().await.recv().await;
        }

        let delay = *self.delay.lock().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on.lock().await.contains(&key.example_idx) {
            return Err(WorkerError::Request(format!(
                "injected failure for example {}",
                key.example_idx
            )));
        }

        let results = self.results.lock().await;
        Ok(results
            .get(&key.example_idx)
            .cloned()
            .unwrap_or_else(|| json!({ "out": format!("output-{}", key.example_idx) })))
    }
}
