//! # Kafka Source
//!
//! [`MessageSource`] backed by an rdkafka `BaseConsumer`

use crate::{ConsumeConfig, KafkaConfig, Message, MessageSource, SourceError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Kafka consumer subscribed to the configured topics
pub struct KafkaSource {
    consumer: BaseConsumer,
    topics: Vec<String>,
}

impl KafkaSource {
    /// Connect and subscribe
    pub fn new(kafka: &KafkaConfig, consume: &ConsumeConfig) -> Result<Self, SourceError> {
        if kafka.enable_auto_commit() && consume.commit_cadence.at_end() {
            warn!(
                "enable.auto.commit is true while commit_cadence is {}; the client may commit \
                 offsets before they are applied. Set enable.auto.commit to false to commit \
                 only at {}",
                consume.commit_cadence, consume.commit_cadence
            );
        }

        let consumer: BaseConsumer = client_config(kafka).create()?;
        let topics: Vec<&str> = consume.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics)?;
        info!("Subscribed to {:?} as group {}", consume.topics, kafka.group_id);

        Ok(Self { consumer, topics: consume.topics.clone() })
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

/// Client configuration for `kafka`
///
/// Extra properties are applied last and win over the named fields.
pub fn client_config(kafka: &KafkaConfig) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", kafka.bootstrap_servers.join(","))
        .set("group.id", &kafka.group_id);
    for (key, value) in &kafka.properties {
        config.set(key, value);
    }
    config
}

/// librdkafka refuses a commit when no offset has been stored since the last one
fn is_no_offset(error: &KafkaError) -> bool {
    matches!(error, KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset))
}

fn to_message(msg: &BorrowedMessage<'_>) -> Message {
    let headers = msg
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    let value = header
                        .value
                        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                        .unwrap_or_default();
                    (header.key.to_string(), value)
                })
                .collect()
        })
        .unwrap_or_else(HashMap::new);

    Message {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(<[u8]>::to_vec),
        payload: msg.payload().map(<[u8]>::to_vec),
        timestamp: msg.timestamp().to_millis(),
        headers,
    }
}

impl MessageSource for KafkaSource {
    type Message = Message;

    /// Poll until `max_count` messages arrive or `timeout` runs out
    ///
    /// Once the deadline has passed no further poll blocks, but messages the
    /// client already holds are still taken without waiting, up to
    /// `max_count`. The call returns as soon as a poll comes back empty.
    fn consume(
        &mut self,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<Message>, SourceError> {
        let start = Instant::now();
        let mut batch = Vec::with_capacity(max_count);

        while batch.len() < max_count {
            let wait = timeout.saturating_sub(start.elapsed());
            match self.consumer.poll(wait) {
                Some(Ok(msg)) => batch.push(to_message(&msg)),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        debug!("Polled {} of {} requested messages", batch.len(), max_count);
        Ok(batch)
    }

    fn commit(&mut self) -> Result<(), SourceError> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Err(e) if is_no_offset(&e) => {
                debug!("No offsets to commit");
                Ok(())
            }
            result => Ok(result?),
        }
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.consumer.unsubscribe();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "kafka_source"
    }
}
