//! # Message Sources
//!
//! The pull interface the consume loop reads from, plus an in-memory source

use crate::Message;
use std::collections::VecDeque;
use std::io::BufRead;
use std::time::Duration;

/// A source of message batches
///
/// `consume` returns between zero and `max_count` messages, blocking for at
/// most `timeout`. An empty batch means nothing was available in time.
pub trait MessageSource {
    /// Message type handed to apply functions
    type Message;

    /// Pull up to `max_count` messages
    fn consume(
        &mut self,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<Self::Message>, SourceError>;

    /// Commit the offsets of everything consumed so far
    fn commit(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Release subscriptions held by the source
    fn close(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Get source name
    fn name(&self) -> &'static str;
}

/// Source error
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Source closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message on line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Source error: {0}")]
    Other(String),
}

/// In-memory message source
///
/// Hands out queued messages in order and keeps a record of every request
/// count, commit and close it sees.
#[derive(Debug, Clone)]
pub struct MemorySource<M = Message> {
    messages: VecDeque<M>,
    requests: Vec<usize>,
    commits: usize,
    closes: usize,
    closed: bool,
}

impl<M> MemorySource<M> {
    /// Create a source holding `messages`
    pub fn new(messages: impl IntoIterator<Item = M>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
            requests: Vec::new(),
            commits: 0,
            closes: 0,
            closed: false,
        }
    }

    /// Messages not yet consumed
    pub fn remaining(&self) -> usize {
        self.messages.len()
    }

    /// Request counts passed to `consume`, in call order
    pub fn requests(&self) -> &[usize] {
        &self.requests
    }

    /// Number of commits
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Number of closes
    pub fn closes(&self) -> usize {
        self.closes
    }
}

impl MemorySource<Message> {
    /// Load messages from JSON lines, one [`Message`] object per line
    ///
    /// Blank lines are skipped.
    pub fn from_json_lines(reader: impl BufRead) -> Result<Self, SourceError> {
        let mut messages = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(&line)
                .map_err(|source| SourceError::Decode { line: index + 1, source })?;
            messages.push(message);
        }
        Ok(Self::new(messages))
    }
}

impl<M> MessageSource for MemorySource<M> {
    type Message = M;

    fn consume(&mut self, max_count: usize, _timeout: Duration) -> Result<Vec<M>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        self.requests.push(max_count);
        let count = max_count.min(self.messages.len());
        Ok(self.messages.drain(..count).collect())
    }

    fn commit(&mut self) -> Result<(), SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        self.commits += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.closed = true;
        self.closes += 1;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory_source"
    }
}
