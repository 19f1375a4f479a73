//! # Batch Consumption
//!
//! The bounded consume loop: pull a batch, apply, repeat until the message
//! budget is spent or the source hands back an empty batch.

use crate::{CommitCadence, ConfigError, ConsumeConfig, MessageSource, SourceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

type MessageFn<M> = Box<dyn FnMut(&M) -> anyhow::Result<()> + Send>;
type BatchFn<M> = Box<dyn FnMut(&[M]) -> anyhow::Result<()> + Send>;

/// Function applied to consumed messages
pub enum ApplyFunction<M> {
    /// Consume and discard
    None,

    /// Called once per message
    PerMessage(MessageFn<M>),

    /// Called once per non-empty batch
    PerBatch(BatchFn<M>),
}

impl<M> ApplyFunction<M> {
    /// Wrap a per-message function
    pub fn per_message<F>(f: F) -> Self
    where
        F: FnMut(&M) -> anyhow::Result<()> + Send + 'static,
    {
        ApplyFunction::PerMessage(Box::new(f))
    }

    /// Wrap a per-batch function
    pub fn per_batch<F>(f: F) -> Self
    where
        F: FnMut(&[M]) -> anyhow::Result<()> + Send + 'static,
    {
        ApplyFunction::PerBatch(Box::new(f))
    }

    /// Apply to one batch, stopping at the first error
    pub fn apply(&mut self, batch: &[M]) -> anyhow::Result<()> {
        match self {
            ApplyFunction::None => Ok(()),
            ApplyFunction::PerMessage(f) => batch.iter().try_for_each(|message| f(message)),
            ApplyFunction::PerBatch(f) => f(batch),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            ApplyFunction::None => "none",
            ApplyFunction::PerMessage(_) => "per_message",
            ApplyFunction::PerBatch(_) => "per_batch",
        }
    }
}

impl<M> Default for ApplyFunction<M> {
    fn default() -> Self {
        ApplyFunction::None
    }
}

impl<M> std::fmt::Debug for ApplyFunction<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ApplyFunction").field(&self.mode()).finish()
    }
}

/// Limits for one consume run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumePlan {
    max_messages: Option<usize>,
    max_batch_size: usize,
    poll_timeout: Duration,
}

impl ConsumePlan {
    /// Build a plan
    ///
    /// A budget smaller than one batch is raised to `max_batch_size`.
    /// A budget of zero stays zero.
    pub fn new(
        max_messages: Option<usize>,
        max_batch_size: usize,
        poll_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        let max_messages = match max_messages {
            Some(requested) if requested > 0 && requested < max_batch_size => {
                warn!(
                    "max_batch_size ({}) > max_messages ({}); \
                     setting max_messages to max_batch_size",
                    max_batch_size, requested
                );
                Some(max_batch_size)
            }
            other => other,
        };

        Ok(Self { max_messages, max_batch_size, poll_timeout })
    }

    /// Build a plan from a consume configuration
    pub fn from_config(config: &ConsumeConfig) -> Result<Self, ConfigError> {
        Self::new(config.max_messages, config.max_batch_size, config.poll_timeout()?)
    }

    /// Effective message budget; `None` reads to the end of the log
    pub fn max_messages(&self) -> Option<usize> {
        self.max_messages
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Whether the run stops only when the source runs dry
    pub fn reads_to_end(&self) -> bool {
        self.max_messages.is_none()
    }

    /// Messages to request given what is left of the budget
    pub fn request_size(&self, remaining: Option<usize>) -> usize {
        match remaining {
            Some(left) if left <= self.max_batch_size => left,
            _ => self.max_batch_size,
        }
    }
}

/// Outcome of a consume run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeReport {
    /// Messages consumed across all batches
    pub total_consumed: usize,

    /// Non-empty batches
    pub batches: usize,

    /// Calls made to the source
    pub requests: usize,

    /// Offset commits issued
    pub commits: usize,

    /// Stopped because the source returned an empty batch
    pub reached_end: bool,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ConsumeReport {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            total_consumed: 0,
            batches: 0,
            requests: 0,
            commits: 0,
            reached_end: false,
            started_at: now,
            finished_at: now,
        }
    }

    /// Wall-clock duration of the run
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Consume error
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Transform(anyhow::Error),

    #[error("Commit failed: {0}")]
    Commit(#[source] SourceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Unknown apply function: {0}")]
    UnknownFunction(String),

    #[error("Apply function {name} takes a {found}, expected a {expected}")]
    WrongFunctionKind {
        name: String,
        expected: crate::FunctionKind,
        found: crate::FunctionKind,
    },
}

/// Run the consume loop without committing
pub fn run<S>(
    source: &mut S,
    max_messages: Option<usize>,
    max_batch_size: usize,
    poll_timeout: Duration,
    apply: &mut ApplyFunction<S::Message>,
) -> Result<ConsumeReport, ConsumeError>
where
    S: MessageSource + ?Sized,
{
    let plan = ConsumePlan::new(max_messages, max_batch_size, poll_timeout)?;
    consume_batches(source, &plan, apply, CommitCadence::Never)
}

/// Run the consume loop under `plan`
///
/// Commits after every non-empty batch when `cadence` asks for it. The
/// end-of-run commit and closing the source are left to the caller.
pub fn consume_batches<S>(
    source: &mut S,
    plan: &ConsumePlan,
    apply: &mut ApplyFunction<S::Message>,
    cadence: CommitCadence,
) -> Result<ConsumeReport, ConsumeError>
where
    S: MessageSource + ?Sized,
{
    let mut report = ConsumeReport::start();
    let mut remaining = plan.max_messages();

    while remaining.map_or(true, |left| left > 0) {
        let request = plan.request_size(remaining);
        let batch = source.consume(request, plan.poll_timeout())?;
        report.requests += 1;

        if batch.is_empty() {
            info!("Reached end of log. Exiting.");
            report.reached_end = true;
            break;
        }

        if batch.len() > request {
            warn!(
                "{} returned {} messages for a request of {}",
                source.name(),
                batch.len(),
                request
            );
        }
        debug!("Consumed batch of {} messages from {}", batch.len(), source.name());

        apply.apply(&batch).map_err(ConsumeError::Transform)?;

        report.batches += 1;
        report.total_consumed += batch.len();
        remaining = remaining.map(|left| left.saturating_sub(batch.len()));

        if cadence.per_batch() {
            info!("committing offset at {}", cadence);
            source.commit().map_err(ConsumeError::Commit)?;
            report.commits += 1;
        }
    }

    report.finished_at = Utc::now();
    Ok(report)
}
