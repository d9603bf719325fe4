use crate::config::BatchConfig;
use crate::errors::{DispatchError, QueueError, Result};
use crate::model::{HitBatch, PendingEntry};
use crate::queue::{DurableHitQueue, HitDisposition, HitProcessor, QueueState};
use crate::state::StateFacade;
use async_trait::async_trait;
use log::{debug, error, warn};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

/// Consumer of a fully-built batch, typically the wire-payload/transport
/// layer. Fire-and-forget at this boundary: transport reliability beyond the
/// returned result is the sink's concern.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn dispatch(&self, batch: HitBatch) -> Result<()>;
}

/// Queue processor for the event lanes. The sink is wired after construction;
/// until then every record answers `Retry`, so pre-wiring batches simply stay
/// at the head of the durable queue and drain in order once wiring happens.
pub struct BatchDispatchProcessor {
    lane: &'static str,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

impl BatchDispatchProcessor {
    pub fn new(lane: &'static str) -> Self {
        Self {
            lane,
            sink: RwLock::new(None),
        }
    }

    pub fn wire(&self, sink: Arc<dyn EventSink>) {
        let mut guard = self.sink.write().unwrap();
        *guard = Some(sink);
        debug!("[{}] event sink wired", self.lane);
    }
}

#[async_trait]
impl HitProcessor for BatchDispatchProcessor {
    async fn process(&self, payload: &[u8]) -> HitDisposition {
        let sink = match &*self.sink.read().unwrap() {
            Some(sink) => sink.clone(),
            None => return HitDisposition::Retry,
        };

        let batch: HitBatch = match rmp_serde::from_slice(payload) {
            Ok(batch) => batch,
            Err(e) => return HitDisposition::Drop(format!("undecodable batch: {e}")),
        };

        let batch_id = batch.batch_id.clone();
        match sink.dispatch(batch).await {
            Ok(()) => {
                debug!("[{}] dispatched batch {batch_id}", self.lane);
                HitDisposition::Delivered
            }
            // Only a definitive client-side rejection discards a persisted
            // batch; timeouts, transport failures and server-side statuses
            // stay durable and retry.
            Err(e) => match e.as_dispatch() {
                Some(DispatchError::Status(status))
                    if (400..500).contains(status) && *status != 429 =>
                {
                    HitDisposition::Drop(format!(
                        "sink rejected batch {batch_id} with status {status}"
                    ))
                }
                _ => {
                    warn!(
                        "[{}] dispatch of batch {batch_id} failed, will retry: {e}",
                        self.lane
                    );
                    HitDisposition::Retry
                }
            },
        }
    }
}

struct LaneBuffer {
    entries: Vec<PendingEntry>,
    /// Arrival time of the oldest unflushed entry.
    oldest_at: Option<Instant>,
}

struct Lane {
    name: &'static str,
    buffer: Mutex<LaneBuffer>,
    queue: Option<DurableHitQueue>,
}

impl Lane {
    fn new(name: &'static str, queue: Option<DurableHitQueue>) -> Self {
        if queue.is_none() {
            warn!("[{name}] lane disabled: durable queue unavailable");
        }
        Self {
            name,
            buffer: Mutex::new(LaneBuffer {
                entries: Vec::new(),
                oldest_at: None,
            }),
            queue,
        }
    }
}

/// Poll period of the shared timer driving the time-based flush trigger.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Accumulates accepted tracking requests into two independent buffers and
/// drains them into the corresponding durable queue on a size trigger, a time
/// trigger, or an explicit flush.
///
/// The coordinator performs no retries: once a drained batch is persisted,
/// durability and delivery are entirely the queue's problem.
pub struct BatchCoordinator {
    state: Arc<StateFacade>,
    asset: Lane,
    experience: Lane,
}

impl BatchCoordinator {
    /// Builds the coordinator and spawns the shared flush timer. A `None`
    /// queue disables the corresponding lane without affecting the other.
    pub fn new(
        state: Arc<StateFacade>,
        asset_queue: Option<DurableHitQueue>,
        experience_queue: Option<DurableHitQueue>,
    ) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            state,
            asset: Lane::new("asset", asset_queue),
            experience: Lane::new("experience", experience_queue),
        });

        let weak: Weak<BatchCoordinator> = Arc::downgrade(&coordinator);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.tick().await;
            }
        });

        coordinator
    }

    pub async fn enqueue_asset(&self, entry: PendingEntry) {
        self.enqueue(&self.asset, entry).await;
    }

    pub async fn enqueue_experience(&self, entry: PendingEntry) {
        self.enqueue(&self.experience, entry).await;
    }

    /// Explicit external flush trigger, exposed as a lifecycle hook
    /// (e.g. app backgrounding). Flushing empty buffers is a no-op.
    pub async fn flush_now(&self) {
        let drained = Self::drain(&self.asset);
        self.persist(&self.asset, drained).await;
        let drained = Self::drain(&self.experience);
        self.persist(&self.experience, drained).await;
    }

    /// Discards buffered (not yet durable) entries. Durable queue contents
    /// are untouched.
    pub fn clear_buffers(&self) {
        for lane in [&self.asset, &self.experience] {
            let mut buffer = lane.buffer.lock().unwrap();
            if !buffer.entries.is_empty() {
                warn!(
                    "[{}] discarding {} buffered entries on reset",
                    lane.name,
                    buffer.entries.len()
                );
            }
            buffer.entries.clear();
            buffer.oldest_at = None;
        }
    }

    pub fn start(&self) {
        for lane in [&self.asset, &self.experience] {
            if let Some(queue) = &lane.queue {
                queue.start();
            }
        }
    }

    pub fn suspend(&self) {
        for lane in [&self.asset, &self.experience] {
            if let Some(queue) = &lane.queue {
                queue.suspend();
            }
        }
    }

    pub fn asset_queue_state(&self) -> Option<QueueState> {
        self.asset.queue.as_ref().map(|q| q.state())
    }

    pub fn experience_queue_state(&self) -> Option<QueueState> {
        self.experience.queue.as_ref().map(|q| q.state())
    }

    pub async fn pending_asset_hits(&self) -> usize {
        match &self.asset.queue {
            Some(queue) => queue.pending().await,
            None => 0,
        }
    }

    pub async fn pending_experience_hits(&self) -> usize {
        match &self.experience.queue {
            Some(queue) => queue.pending().await,
            None => 0,
        }
    }

    fn batch_config(&self) -> BatchConfig {
        self.state
            .configuration()
            .map(|c| c.batch)
            .unwrap_or_default()
    }

    async fn enqueue(&self, lane: &Lane, entry: PendingEntry) {
        if lane.queue.is_none() {
            warn!("[{}] entry discarded: lane disabled", lane.name);
            return;
        }
        let config = self.batch_config();

        if !config.enabled {
            // Batching disabled: dispatch immediately as a singleton batch.
            self.persist(lane, vec![entry]).await;
            return;
        }

        let drained = {
            let mut buffer = lane.buffer.lock().unwrap();
            buffer.entries.push(entry);
            if buffer.oldest_at.is_none() {
                buffer.oldest_at = Some(Instant::now());
            }
            if buffer.entries.len() >= config.max_size.max(1) {
                buffer.oldest_at = None;
                std::mem::take(&mut buffer.entries)
            } else {
                Vec::new()
            }
        };

        self.persist(lane, drained).await;
    }

    /// Time trigger: flush a lane once its oldest unflushed entry is older
    /// than the configured interval.
    async fn tick(&self) {
        let interval = Duration::from_secs(self.batch_config().max_interval_secs.max(1));
        for lane in [&self.asset, &self.experience] {
            let drained = {
                let mut buffer = lane.buffer.lock().unwrap();
                match buffer.oldest_at {
                    Some(oldest) if oldest.elapsed() >= interval => {
                        buffer.oldest_at = None;
                        std::mem::take(&mut buffer.entries)
                    }
                    _ => Vec::new(),
                }
            };
            self.persist(lane, drained).await;
        }
    }

    fn drain(lane: &Lane) -> Vec<PendingEntry> {
        let mut buffer = lane.buffer.lock().unwrap();
        buffer.oldest_at = None;
        std::mem::take(&mut buffer.entries)
    }

    /// Hands a drained list to the lane's durable queue. Failures degrade to
    /// reduced telemetry fidelity; they never reach the tracking caller.
    async fn persist(&self, lane: &Lane, entries: Vec<PendingEntry>) {
        if entries.is_empty() {
            return;
        }
        let Some(queue) = &lane.queue else {
            return;
        };

        let count = entries.len();
        let batch = HitBatch::new(entries);
        let encoded = match rmp_serde::to_vec_named(&batch) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err: crate::errors::Error = QueueError::EncodeFailed(Box::new(e)).into();
                error!("[{}] failed to encode batch: {err}", lane.name);
                return;
            }
        };

        match queue.enqueue(&encoded).await {
            Ok(seq) => debug!(
                "[{}] persisted batch {} ({count} entries) as record {seq}",
                lane.name, batch.batch_id
            ),
            Err(e) => error!("[{}] failed to persist batch: {e}", lane.name),
        }
    }
}
