use crate::config::Configuration;
use crate::errors::{DispatchError, QueueError, Result};
use crate::model::{now_ms, DefinitionPayload, FeaturizationRecord};
use crate::queue::{Backoff, DurableHitQueue, HitDisposition, HitProcessor};
use crate::state::StateFacade;
use async_trait::async_trait;
use log::{debug, error, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Fallback region used when neither an explicit URL nor a network domain is
/// configured.
pub const DEFAULT_REGION: &str = "va6";
const DEFAULT_DOMAIN: &str = "collect.beacondata.net";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves the featurization endpoint: explicit configured URL, else derived
/// from a known network domain, else the hard-coded default region.
pub fn resolve_endpoint(config: Option<&Configuration>) -> String {
    if let Some(config) = config {
        if let Some(url) = &config.featurization.url {
            return url.trim_end_matches('/').to_string();
        }
        if let Some(domain) = &config.featurization.domain {
            return format!("https://ml.{domain}");
        }
    }
    format!("https://ml-{DEFAULT_REGION}.{DEFAULT_DOMAIN}")
}

/// Client against the ML featurization service.
#[async_trait]
pub trait FeaturizationClient: Send + Sync {
    async fn send(&self, base_url: &str, payload: &DefinitionPayload) -> Result<()>;
}

/// Default client: one POST per definition with a per-attempt timeout.
pub struct HttpFeaturizationClient {
    http: reqwest::Client,
}

impl HttpFeaturizationClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| DispatchError::Client(Box::new(e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl FeaturizationClient for HttpFeaturizationClient {
    async fn send(&self, base_url: &str, payload: &DefinitionPayload) -> Result<()> {
        let url = format!("{base_url}/v1/featurize");
        let response = self.http.post(&url).json(payload).send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout
            } else {
                DispatchError::Transport(Box::new(e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::Status(status.as_u16()).into())
        }
    }
}

/// Queue processor mapping client outcomes onto dispositions: timeouts,
/// transport failures and server-side statuses retry; client-side statuses
/// are permanent rejections.
struct FeaturizationProcessor {
    client: Arc<dyn FeaturizationClient>,
}

#[async_trait]
impl HitProcessor for FeaturizationProcessor {
    async fn process(&self, payload: &[u8]) -> HitDisposition {
        let record: FeaturizationRecord = match rmp_serde::from_slice(payload) {
            Ok(record) => record,
            Err(e) => return HitDisposition::Drop(format!("undecodable record: {e}")),
        };

        match self.client.send(&record.endpoint, &record.definition).await {
            Ok(()) => {
                debug!(
                    "featurization submitted definition '{}' to {}",
                    record.definition.id, record.endpoint
                );
                HitDisposition::Delivered
            }
            Err(e) => match e.as_dispatch() {
                Some(DispatchError::Status(status)) if (400..500).contains(status) && *status != 429 => {
                    HitDisposition::Drop(format!(
                        "definition '{}' rejected with status {status}",
                        record.definition.id
                    ))
                }
                _ => HitDisposition::Retry,
            },
        }
    }
}

/// Decides, per content definition, whether to submit it to the featurization
/// queue, enforcing once-per-definition and privacy gating.
pub struct FeaturizationCoordinator {
    state: Arc<StateFacade>,
    queue: DurableHitQueue,
}

impl FeaturizationCoordinator {
    pub async fn open(
        state: Arc<StateFacade>,
        dir: impl Into<PathBuf>,
        client: Arc<dyn FeaturizationClient>,
        backoff: Backoff,
    ) -> Result<Self> {
        let processor = Arc::new(FeaturizationProcessor { client });
        let queue = DurableHitQueue::open("featurization", dir, processor, backoff).await?;
        Ok(Self { state, queue })
    }

    pub fn start(&self) {
        self.queue.start();
    }

    pub fn suspend(&self) {
        self.queue.suspend();
    }

    pub async fn pending(&self) -> usize {
        self.queue.pending().await
    }

    /// Submits the definition behind an interaction exactly once per cached
    /// lifetime. Absent definitions are a warning-level no-op; definitions
    /// already submitted are a silent no-op.
    pub async fn on_interaction(&self, definition_id: &str) {
        if !self.state.cache().contains(definition_id) {
            warn!("featurization skipped: unknown definition '{definition_id}'");
            return;
        }
        let Some(definition) = self.state.cache().claim_for_submission(definition_id) else {
            // Already submitted.
            return;
        };

        let config = self.state.configuration();
        let record = FeaturizationRecord {
            endpoint: resolve_endpoint(config.as_ref()),
            definition: DefinitionPayload::from(&definition),
            created_at_ms: now_ms(),
        };

        let encoded = match rmp_serde::to_vec_named(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err: crate::errors::Error = QueueError::EncodeFailed(Box::new(e)).into();
                error!("failed to encode featurization record for '{definition_id}': {err}");
                // The claim only holds once the record is durable.
                self.state.cache().release_claim(definition_id);
                return;
            }
        };

        if let Err(e) = self.queue.enqueue(&encoded).await {
            error!("failed to enqueue featurization record for '{definition_id}': {e}");
            self.state.cache().release_claim(definition_id);
        }
    }
}
