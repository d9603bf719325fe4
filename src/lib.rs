//! beacon: interaction telemetry core.
//!
//! Records content/experience interaction events, batches them under a
//! size/time flush policy, persists every drained batch to a disk-backed
//! retrying hit queue, and submits content definitions to an ML featurization
//! service exactly once per cached definition. All network effects are gated
//! on dynamic consent/exclusion rules.

pub mod batch;
pub mod cache;
pub mod config;
pub mod errors;
pub mod featurization;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod state;

pub use batch::{BatchCoordinator, BatchDispatchProcessor, EventSink};
pub use cache::DefinitionCache;
pub use config::{BatchConfig, Configuration, FeaturizationConfig, MatchRule, PrivacyConfig};
pub use errors::{Error, ErrorKind, Result};
pub use featurization::{
    FeaturizationClient, FeaturizationCoordinator, HttpFeaturizationClient, DEFAULT_REGION,
};
pub use model::{
    AssetRef, ContentDefinition, DefinitionPayload, FeaturizationRecord, HitBatch,
    InteractionType, PendingEntry,
};
pub use pipeline::{Pipeline, PipelineOptions};
pub use queue::{Backoff, DurableHitQueue, HitDisposition, HitProcessor, HitStore, QueueState};
pub use state::{ConfigurationStore, StateFacade};
