use crate::batch::{BatchCoordinator, BatchDispatchProcessor, EventSink};
use crate::config::Configuration;
use crate::featurization::{FeaturizationClient, FeaturizationCoordinator, HttpFeaturizationClient};
use crate::model::{now_ms, AssetRef, ContentDefinition, InteractionType, PendingEntry};
use crate::queue::{Backoff, DurableHitQueue};
use crate::state::StateFacade;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Construction options for a [`Pipeline`].
pub struct PipelineOptions {
    data_dir: PathBuf,
    cache_capacity: usize,
    backoff: Backoff,
    featurization_client: Option<Arc<dyn FeaturizationClient>>,
}

impl PipelineOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            backoff: Backoff::default(),
            featurization_client: None,
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_featurization_client(mut self, client: Arc<dyn FeaturizationClient>) -> Self {
        self.featurization_client = Some(client);
        self
    }
}

/// Orchestration facade over the core: validates configuration and exclusion
/// rules, buffers accepted requests, and routes definition interactions into
/// the featurization side channel.
///
/// Tracking calls never block on the network; once an entry is accepted and
/// durably enqueued the caller's interaction is handled regardless of the
/// eventual delivery outcome.
pub struct Pipeline {
    state: Arc<StateFacade>,
    batch: Arc<BatchCoordinator>,
    asset_dispatch: Arc<BatchDispatchProcessor>,
    experience_dispatch: Arc<BatchDispatchProcessor>,
    featurization: Option<FeaturizationCoordinator>,
}

impl Pipeline {
    /// Builds the pipeline under the given data directory; each durable queue
    /// owns a named subdirectory. A queue that fails to open disables only
    /// the feature depending on it.
    pub async fn open(options: PipelineOptions) -> Arc<Self> {
        let state = Arc::new(StateFacade::new(options.cache_capacity));

        let asset_dispatch = Arc::new(BatchDispatchProcessor::new("asset"));
        let experience_dispatch = Arc::new(BatchDispatchProcessor::new("experience"));

        let asset_queue = match DurableHitQueue::open(
            "asset",
            options.data_dir.join("asset"),
            asset_dispatch.clone(),
            options.backoff,
        )
        .await
        {
            Ok(queue) => Some(queue),
            Err(e) => {
                warn!("asset tracking disabled: {e}");
                None
            }
        };

        let experience_queue = match DurableHitQueue::open(
            "experience",
            options.data_dir.join("experience"),
            experience_dispatch.clone(),
            options.backoff,
        )
        .await
        {
            Ok(queue) => Some(queue),
            Err(e) => {
                warn!("experience tracking disabled: {e}");
                None
            }
        };

        let client = match options.featurization_client {
            Some(client) => Some(client),
            None => match HttpFeaturizationClient::new() {
                Ok(client) => Some(Arc::new(client) as Arc<dyn FeaturizationClient>),
                Err(e) => {
                    warn!("featurization disabled: {e}");
                    None
                }
            },
        };
        let featurization = match client {
            Some(client) => {
                match FeaturizationCoordinator::open(
                    state.clone(),
                    options.data_dir.join("featurization"),
                    client,
                    options.backoff,
                )
                .await
                {
                    Ok(coordinator) => Some(coordinator),
                    Err(e) => {
                        warn!("featurization disabled: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        let batch = BatchCoordinator::new(state.clone(), asset_queue, experience_queue);

        Arc::new(Self {
            state,
            batch,
            asset_dispatch,
            experience_dispatch,
            featurization,
        })
    }

    /// Wires the out-bound event sink. Batches persisted before wiring remain
    /// durable and are delivered afterwards.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        self.asset_dispatch.wire(sink.clone());
        self.experience_dispatch.wire(sink);
    }

    /// Activates dispatch on every durable queue.
    pub fn start(&self) {
        self.batch.start();
        if let Some(featurization) = &self.featurization {
            featurization.start();
        }
    }

    /// Halts all dispatch without discarding queued work, e.g. on consent
    /// revocation or while offline.
    pub fn suspend(&self) {
        self.batch.suspend();
        if let Some(featurization) = &self.featurization {
            featurization.suspend();
        }
    }

    /// Explicit flush hook for the host lifecycle layer.
    pub async fn flush(&self) {
        self.batch.flush_now().await;
    }

    pub fn update_configuration(&self, config: Configuration) {
        self.state.update_configuration(config);
    }

    pub fn register_definition(
        &self,
        id: impl Into<String>,
        assets: Vec<AssetRef>,
        texts: Vec<String>,
        ctas: Option<Vec<String>>,
    ) {
        self.state
            .cache()
            .store(ContentDefinition::new(id, assets, texts, ctas));
    }

    /// Records an asset interaction, gated on the URL and location exclusion
    /// rules. A denied interaction leaves no trace anywhere downstream.
    pub async fn track_asset(
        &self,
        url: &str,
        interaction: InteractionType,
        location: Option<&str>,
        extras: Option<HashMap<String, Value>>,
    ) {
        if !self.state.should_track_url(Some(url)) || !self.state.should_track_location(location) {
            debug!("asset interaction excluded by privacy rules: {url}");
            return;
        }

        let entry = PendingEntry::Asset {
            url: url.to_string(),
            interaction,
            location: location.map(str::to_string),
            extras: extras.unwrap_or_default(),
            accepted_at_ms: now_ms(),
        };
        self.batch.enqueue_asset(entry).await;
    }

    /// Records an experience interaction and routes the definition into the
    /// featurization side channel. An evicted/unknown definition produces a
    /// degraded hit with a warning rather than an error.
    pub async fn track_experience(
        &self,
        definition_id: &str,
        interaction: InteractionType,
        location: Option<&str>,
        extras: Option<HashMap<String, Value>>,
    ) {
        if !self.state.should_track_location(location) {
            debug!("experience interaction excluded by privacy rules: {definition_id}");
            return;
        }

        let definition = self.state.cache().get(definition_id);
        if definition.is_none() {
            warn!("definition '{definition_id}' not cached, recording degraded hit");
        }
        let (assets, texts) = definition
            .as_ref()
            .map(|d| (d.assets.clone(), d.texts.clone()))
            .unwrap_or_default();

        let entry = PendingEntry::Experience {
            definition_id: definition_id.to_string(),
            interaction,
            location: location.map(str::to_string),
            assets,
            texts,
            degraded: definition.is_none(),
            extras: extras.unwrap_or_default(),
            accepted_at_ms: now_ms(),
        };
        self.batch.enqueue_experience(entry).await;

        if let Some(featurization) = &self.featurization {
            featurization.on_interaction(definition_id).await;
        }
    }

    /// Clears the configuration, the definition cache and any buffered (not
    /// yet durable) entries. Durable queue contents are untouched.
    pub async fn reset(&self) {
        self.state.reset();
        self.batch.clear_buffers();
    }

    pub fn state(&self) -> &StateFacade {
        &self.state
    }

    pub async fn pending_hits(&self) -> usize {
        let mut total =
            self.batch.pending_asset_hits().await + self.batch.pending_experience_hits().await;
        if let Some(featurization) = &self.featurization {
            total += featurization.pending().await;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::EventSink;
    use crate::config::{BatchConfig, MatchRule, PrivacyConfig};
    use crate::errors::Result;
    use crate::model::{DefinitionPayload, HitBatch};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::time::{sleep, Duration};

    struct RecordingSink {
        batches: Mutex<Vec<HitBatch>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
            }
        }

        fn batches(&self) -> Vec<HitBatch> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn dispatch(&self, batch: HitBatch) -> Result<()> {
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    struct RecordingClient {
        sent: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FeaturizationClient for RecordingClient {
        async fn send(&self, _base_url: &str, payload: &DefinitionPayload) -> Result<()> {
            self.sent.lock().unwrap().push(payload.id.clone());
            Ok(())
        }
    }

    fn exclusion_config() -> Configuration {
        Configuration {
            batch: BatchConfig {
                enabled: true,
                max_size: 1,
                max_interval_secs: 600,
            },
            privacy: PrivacyConfig {
                url_exclusions: vec![MatchRule::Prefix {
                    value: "https://private.".to_string(),
                }],
                location_exclusions: vec![MatchRule::Exact {
                    value: "settings".to_string(),
                }],
            },
            ..Default::default()
        }
    }

    async fn pipeline(
        dir: &std::path::Path,
        sink: Arc<RecordingSink>,
        client: Arc<RecordingClient>,
    ) -> Arc<Pipeline> {
        let _ = env_logger::builder().is_test(true).try_init();
        let pipeline = Pipeline::open(
            PipelineOptions::new(dir)
                .with_cache_capacity(8)
                .with_backoff(Backoff::new(10, 50))
                .with_featurization_client(client),
        )
        .await;
        pipeline.set_event_sink(sink);
        pipeline.start();
        pipeline.update_configuration(exclusion_config());
        pipeline
    }

    #[tokio::test]
    async fn test_excluded_url_is_end_to_end_noop() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let client = Arc::new(RecordingClient::new());
        let pipeline = pipeline(dir.path(), sink.clone(), client).await;

        pipeline
            .track_asset("https://private.corp/page", InteractionType::View, None, None)
            .await;

        sleep(Duration::from_millis(200)).await;
        assert!(sink.batches().is_empty());
        assert_eq!(pipeline.pending_hits().await, 0);
    }

    #[tokio::test]
    async fn test_denied_experience_leaves_no_downstream_state() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let client = Arc::new(RecordingClient::new());
        let pipeline = pipeline(dir.path(), sink.clone(), client.clone()).await;

        pipeline.register_definition("d1", vec![AssetRef::new("https://cdn/x.png")], vec![], None);
        pipeline
            .track_experience("d1", InteractionType::View, Some("settings"), None)
            .await;

        sleep(Duration::from_millis(200)).await;
        assert!(sink.batches().is_empty());
        assert!(client.sent.lock().unwrap().is_empty());
        // No cache mutation: the definition is still unsubmitted.
        assert_eq!(pipeline.state().cache().sent_count(), 0);
    }

    #[tokio::test]
    async fn test_allowed_experience_flows_to_sink_and_featurization() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let client = Arc::new(RecordingClient::new());
        let pipeline = pipeline(dir.path(), sink.clone(), client.clone()).await;

        pipeline.register_definition(
            "d1",
            vec![AssetRef::new("https://cdn/x.png")],
            vec!["headline".to_string()],
            None,
        );
        pipeline
            .track_experience("d1", InteractionType::Click, Some("home"), None)
            .await;

        sleep(Duration::from_millis(400)).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        match &batches[0].entries[0] {
            PendingEntry::Experience {
                definition_id,
                degraded,
                assets,
                ..
            } => {
                assert_eq!(definition_id, "d1");
                assert!(!degraded);
                assert_eq!(assets.len(), 1);
            }
            other => panic!("unexpected entry {other:?}"),
        }
        assert_eq!(client.sent.lock().unwrap().as_slice(), ["d1".to_string()]);
        assert_eq!(pipeline.state().cache().sent_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_definition_produces_degraded_hit() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let client = Arc::new(RecordingClient::new());
        let pipeline = pipeline(dir.path(), sink.clone(), client.clone()).await;

        pipeline
            .track_experience("evicted", InteractionType::View, None, None)
            .await;

        sleep(Duration::from_millis(400)).await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        match &batches[0].entries[0] {
            PendingEntry::Experience {
                degraded, assets, texts, ..
            } => {
                assert!(degraded);
                assert!(assets.is_empty());
                assert!(texts.is_empty());
            }
            other => panic!("unexpected entry {other:?}"),
        }
        // Nothing cached, so nothing is featurized.
        assert!(client.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_state_but_not_durable_queues() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let client = Arc::new(RecordingClient::new());
        let pipeline = pipeline(dir.path(), sink.clone(), client).await;

        // Suspend so the persisted hit stays queued.
        pipeline.suspend();
        pipeline
            .track_asset("https://public.example.com/a", InteractionType::View, None, None)
            .await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(pipeline.pending_hits().await, 1);

        pipeline.reset().await;
        assert!(pipeline.state().configuration().is_none());
        assert_eq!(pipeline.pending_hits().await, 1);
    }
}
