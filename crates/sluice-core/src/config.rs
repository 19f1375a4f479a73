//! # Consume Configuration
//!
//! Settings for consume runs and the Kafka connection they read from

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default number of messages requested per consume call
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Default per-call poll timeout in seconds
pub const DEFAULT_POLL_TIMEOUT_SECS: f64 = 60.0;

/// Top-level settings file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Kafka connection configuration
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Consume run configuration
    pub consume: ConsumeConfig,
}

impl Settings {
    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Self::from_file_unvalidated(path)?;
        settings.consume.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file without validating them
    ///
    /// For callers that override fields before validating.
    pub fn from_file_unvalidated(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Parse settings from JSON and validate them
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.consume.validate()?;
        Ok(settings)
    }
}

/// Kafka configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap servers
    pub bootstrap_servers: Vec<String>,

    /// Group ID
    pub group_id: String,

    /// Additional Kafka properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl KafkaConfig {
    /// Whether the client will commit offsets on its own
    ///
    /// librdkafka enables auto commit unless told otherwise.
    pub fn enable_auto_commit(&self) -> bool {
        self.properties
            .get("enable.auto.commit")
            .map(|value| !value.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(true)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            group_id: "sluice".to_string(),
            properties: HashMap::new(),
        }
    }
}

/// When consumed offsets are committed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitCadence {
    /// Never commit; leave it to the client or the caller
    Never,

    /// Commit after every non-empty batch and once at the end
    EndOfBatch,

    /// Commit once after the run
    #[default]
    EndOfOperator,
}

impl CommitCadence {
    /// Commit after each batch
    pub fn per_batch(self) -> bool {
        self == CommitCadence::EndOfBatch
    }

    /// Commit once the run is over
    pub fn at_end(self) -> bool {
        self != CommitCadence::Never
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommitCadence::Never => "never",
            CommitCadence::EndOfBatch => "end_of_batch",
            CommitCadence::EndOfOperator => "end_of_operator",
        }
    }
}

impl std::fmt::Display for CommitCadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consume run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeConfig {
    /// Topics to subscribe to
    pub topics: Vec<String>,

    /// Registered function applied to each message
    #[serde(default)]
    pub apply_function: Option<String>,

    /// Registered function applied to each batch
    #[serde(default)]
    pub apply_function_batch: Option<String>,

    /// Positional arguments bound to the apply function
    #[serde(default)]
    pub apply_function_args: Vec<serde_json::Value>,

    /// Keyword arguments bound to the apply function
    #[serde(default)]
    pub apply_function_kwargs: serde_json::Map<String, serde_json::Value>,

    /// Offset commit cadence
    #[serde(default)]
    pub commit_cadence: CommitCadence,

    /// Total message budget; `None` reads until the source runs dry
    #[serde(default)]
    pub max_messages: Option<usize>,

    /// Messages requested per consume call
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Per-call poll timeout in seconds
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: f64,
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_poll_timeout_secs() -> f64 {
    DEFAULT_POLL_TIMEOUT_SECS
}

impl ConsumeConfig {
    /// Configuration for `topics` with every other field defaulted
    pub fn for_topics<I, T>(topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            apply_function: None,
            apply_function_batch: None,
            apply_function_args: Vec::new(),
            apply_function_kwargs: serde_json::Map::new(),
            commit_cadence: CommitCadence::default(),
            max_messages: None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        }
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.apply_function.is_some() && self.apply_function_batch.is_some() {
            return Err(ConfigError::ConflictingApplyFunctions);
        }
        self.poll_timeout()?;
        Ok(())
    }

    /// Poll timeout as a duration
    pub fn poll_timeout(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.poll_timeout_secs)
            .map_err(|_| ConfigError::InvalidPollTimeout(self.poll_timeout_secs))
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one topic must be configured")]
    NoTopics,

    #[error("max_batch_size must be greater than zero")]
    ZeroBatchSize,

    #[error("apply_function and apply_function_batch are mutually exclusive")]
    ConflictingApplyFunctions,

    #[error("Invalid poll timeout: {0} seconds")]
    InvalidPollTimeout(f64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
