pub mod backoff;
pub mod store;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use store::HitStore;

use crate::errors::Result;
use async_trait::async_trait;
use log::{debug, error, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Lifecycle state of a [`DurableHitQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No dispatch attempts are made; queued records are retained.
    Suspended,
    /// The worker drains records one at a time.
    Active,
}

/// Outcome of one dispatch attempt, decided by the injected processor.
#[derive(Debug, Clone)]
pub enum HitDisposition {
    /// Record delivered: remove it and continue immediately.
    Delivered,
    /// Retryable failure: keep the record at the head and back off.
    Retry,
    /// Permanent rejection: drop the record, log, continue.
    Drop(String),
}

/// Network-side handler invoked for each persisted record. The processor owns
/// its own per-attempt timeout and classifies a timeout as [`HitDisposition::Retry`].
#[async_trait]
pub trait HitProcessor: Send + Sync {
    async fn process(&self, payload: &[u8]) -> HitDisposition;
}

/// Generic disk-backed FIFO queue with a pluggable network processor.
///
/// Starts `Suspended`; `start` transitions to `Active`. Exactly one record is
/// in flight at any time, which bounds resource use and preserves FIFO order
/// within the queue. `enqueue` persists the record before returning, so a
/// crash between enqueue and dispatch loses nothing.
///
/// The worker task is spawned at construction and parks on the suspended
/// state, so queues must be opened inside a tokio runtime.
pub struct DurableHitQueue {
    name: String,
    store: Arc<HitStore>,
    state_tx: watch::Sender<QueueState>,
    wake: Arc<Notify>,
}

impl DurableHitQueue {
    pub async fn open(
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        processor: Arc<dyn HitProcessor>,
        backoff: Backoff,
    ) -> Result<Self> {
        let name = name.into();
        let store = Arc::new(HitStore::open(dir).await?);
        let (state_tx, state_rx) = watch::channel(QueueState::Suspended);
        let wake = Arc::new(Notify::new());

        tokio::spawn(worker_loop(
            name.clone(),
            store.clone(),
            processor,
            backoff,
            state_rx,
            wake.clone(),
        ));

        Ok(Self {
            name,
            store,
            state_tx,
            wake,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> QueueState {
        *self.state_tx.borrow()
    }

    /// Transitions to `Active` and wakes the worker.
    pub fn start(&self) {
        let _ = self.state_tx.send(QueueState::Active);
        self.wake.notify_one();
    }

    /// Halts dispatch (including pending retries) without discarding records.
    pub fn suspend(&self) {
        let _ = self.state_tx.send(QueueState::Suspended);
    }

    pub fn resume(&self) {
        self.start();
    }

    /// Durably persists one record. Returns once the record is on disk.
    pub async fn enqueue(&self, payload: &[u8]) -> Result<u64> {
        let seq = self.store.append(payload).await?;
        self.wake.notify_one();
        Ok(seq)
    }

    pub async fn pending(&self) -> usize {
        self.store.len().await
    }
}

async fn worker_loop(
    name: String,
    store: Arc<HitStore>,
    processor: Arc<dyn HitProcessor>,
    backoff: Backoff,
    mut state_rx: watch::Receiver<QueueState>,
    wake: Arc<Notify>,
) {
    let mut attempt: u32 = 0;
    loop {
        if *state_rx.borrow_and_update() == QueueState::Suspended {
            // Parked until the state changes; exit when the queue is gone.
            if state_rx.changed().await.is_err() {
                break;
            }
            continue;
        }

        let Some((seq, payload)) = store.peek_oldest().await else {
            tokio::select! {
                _ = wake.notified() => {}
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        };

        match processor.process(&payload).await {
            HitDisposition::Delivered => {
                if let Err(e) = store.remove(seq).await {
                    error!("[{name}] failed to acknowledge record {seq}: {e}");
                }
                attempt = 0;
            }
            HitDisposition::Drop(reason) => {
                warn!("[{name}] dropping record {seq}: {reason}");
                if let Err(e) = store.remove(seq).await {
                    error!("[{name}] failed to remove dropped record {seq}: {e}");
                }
                attempt = 0;
            }
            HitDisposition::Retry => {
                attempt = attempt.saturating_add(1);
                let delay = backoff.delay(attempt);
                debug!(
                    "[{name}] retryable failure on record {seq}, attempt {attempt}, backing off {}ms",
                    delay.as_millis()
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("[{name}] worker stopped");
}
