use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// How the user interacted with a piece of content.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    View,
    Click,
}

/// Reference to a single tracked asset (image, video, ...).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub url: String,
    /// Optional MIME type hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl AssetRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            media_type: None,
        }
    }
}

/// A registered composite content unit tracked under one identifier.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContentDefinition {
    pub id: String,
    /// Ordered asset references
    pub assets: Vec<AssetRef>,
    /// Ordered text items
    pub texts: Vec<String>,
    /// Optional ordered call-to-action items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctas: Option<Vec<String>>,
    /// Set once the definition has been handed to the featurization queue.
    /// Volatile: lives only as long as the cache entry does.
    #[serde(default)]
    pub submitted_to_featurization: bool,
}

impl ContentDefinition {
    pub fn new(
        id: impl Into<String>,
        assets: Vec<AssetRef>,
        texts: Vec<String>,
        ctas: Option<Vec<String>>,
    ) -> Self {
        Self {
            id: id.into(),
            assets,
            texts,
            ctas,
            submitted_to_featurization: false,
        }
    }
}

/// An accepted tracking request awaiting flush.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "stream", rename_all = "snake_case")]
pub enum PendingEntry {
    Asset {
        url: String,
        interaction: InteractionType,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        extras: HashMap<String, Value>,
        accepted_at_ms: u64,
    },
    Experience {
        definition_id: String,
        interaction: InteractionType,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<String>,
        /// Asset references copied from the cached definition. Empty when the
        /// definition was evicted before the interaction arrived (degraded hit).
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        assets: Vec<AssetRef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        texts: Vec<String>,
        #[serde(default)]
        degraded: bool,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        extras: HashMap<String, Value>,
        accepted_at_ms: u64,
    },
}

/// A drained buffer, encoded as one persisted hit in an event queue.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HitBatch {
    pub batch_id: String,
    pub created_at_ms: u64,
    pub entries: Vec<PendingEntry>,
}

impl HitBatch {
    pub fn new(entries: Vec<PendingEntry>) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            created_at_ms: now_ms(),
            entries,
        }
    }
}

/// Definition payload shipped to the featurization endpoint. The submission
/// flag is cache bookkeeping and is deliberately not part of the wire shape.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DefinitionPayload {
    pub id: String,
    pub assets: Vec<AssetRef>,
    pub texts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctas: Option<Vec<String>>,
}

impl From<&ContentDefinition> for DefinitionPayload {
    fn from(def: &ContentDefinition) -> Self {
        Self {
            id: def.id.clone(),
            assets: def.assets.clone(),
            texts: def.texts.clone(),
            ctas: def.ctas.clone(),
        }
    }
}

/// One persisted hit in the featurization queue: the target is resolved at
/// enqueue time so a later configuration change cannot redirect queued work.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FeaturizationRecord {
    pub endpoint: String,
    pub definition: DefinitionPayload,
    pub created_at_ms: u64,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

