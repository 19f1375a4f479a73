//! # Sluice Core
//!
//! Bounded batch consumption of message topics.
//! A consume run pulls batches from a [`MessageSource`], hands them to an
//! apply function and stops once the message budget is spent or the source
//! runs dry.

pub mod config;
pub mod consume;
pub mod operator;
pub mod registry;
pub mod source;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use config::*;
pub use consume::*;
pub use operator::*;
pub use registry::*;
pub use source::*;

use std::collections::HashMap;

/// A message read from a topic
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Topic the message was read from
    pub topic: String,

    /// Partition within the topic
    #[serde(default)]
    pub partition: i32,

    /// Offset within the partition
    #[serde(default)]
    pub offset: i64,

    /// Message key
    #[serde(default)]
    pub key: Option<Vec<u8>>,

    /// Message payload
    #[serde(default)]
    pub payload: Option<Vec<u8>>,

    /// Broker timestamp in milliseconds since the epoch
    #[serde(default)]
    pub timestamp: Option<i64>,

    /// Message headers, values decoded lossily as UTF-8
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Message {
    /// Create a message with a UTF-8 payload
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            key: None,
            payload: Some(payload.into().into_bytes()),
            timestamp: None,
            headers: HashMap::new(),
        }
    }

    /// Payload as text, if present and valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        self.payload
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Key as text, if present and valid UTF-8
    pub fn key_str(&self) -> Option<&str> {
        self.key
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Broker timestamp as a UTC date-time
    pub fn timestamp_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timestamp
            .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
    }
}
