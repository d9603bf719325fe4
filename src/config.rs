use crate::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};

/// Batching behavior for the event lanes.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BatchConfig {
    /// When false, every accepted entry is dispatched as a singleton batch
    #[serde(default = "default_batching_enabled")]
    pub enabled: bool,
    /// Size trigger: a lane flushes once this many entries are buffered
    #[serde(default = "default_max_batch_size")]
    pub max_size: usize,
    /// Time trigger: maximum age of the oldest unflushed entry, in seconds
    #[serde(default = "default_max_interval_secs")]
    pub max_interval_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_batching_enabled(),
            max_size: default_max_batch_size(),
            max_interval_secs: default_max_interval_secs(),
        }
    }
}

fn default_batching_enabled() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    50
}

fn default_max_interval_secs() -> u64 {
    60
}

/// A single exclusion matcher evaluated against a URL or location string.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchRule {
    Exact { value: String },
    Prefix { value: String },
    Contains { value: String },
}

impl MatchRule {
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            MatchRule::Exact { value } => candidate == value,
            MatchRule::Prefix { value } => candidate.starts_with(value.as_str()),
            MatchRule::Contains { value } => candidate.contains(value.as_str()),
        }
    }
}

/// Consent/exclusion rules gating every network effect.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PrivacyConfig {
    /// URLs matching any rule are never tracked
    #[serde(default)]
    pub url_exclusions: Vec<MatchRule>,
    /// Screen/placement locations matching any rule are never tracked
    #[serde(default)]
    pub location_exclusions: Vec<MatchRule>,
}

impl PrivacyConfig {
    pub fn url_excluded(&self, url: &str) -> bool {
        self.url_exclusions.iter().any(|r| r.matches(url))
    }

    pub fn location_excluded(&self, location: &str) -> bool {
        self.location_exclusions.iter().any(|r| r.matches(location))
    }
}

/// Featurization endpoint resolution data. Resolution order: explicit `url`,
/// else a URL derived from `domain`, else the hard-coded default region.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FeaturizationConfig {
    /// Explicit endpoint base URL
    #[serde(default)]
    pub url: Option<String>,
    /// Known network domain the endpoint is derived from
    #[serde(default)]
    pub domain: Option<String>,
}

/// Active configuration snapshot. Replaced wholesale on each update,
/// never merged.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Configuration {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub privacy: PrivacyConfig,
    #[serde(default)]
    pub featurization: FeaturizationConfig,
}

impl Configuration {
    /// Loads a configuration snapshot from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(Box::new(e)))?;
        let config: Configuration =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(Box::new(e)))?;
        Ok(config)
    }
}
