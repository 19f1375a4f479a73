//! # Consume Operator
//!
//! One consume task: validated configuration, a resolved apply function and
//! the commit cadence, run against a caller-supplied source.

use crate::{
    consume_batches, ApplyFunction, CommitCadence, ConsumeConfig, ConsumeError, ConsumePlan,
    ConsumeReport, FunctionRegistry, MessageSource,
};
use tracing::{debug, info, warn};

/// Consume task bound to its configuration
#[derive(Debug)]
pub struct ConsumeOperator<M> {
    topics: Vec<String>,
    plan: ConsumePlan,
    cadence: CommitCadence,
    apply: ApplyFunction<M>,
}

impl<M: 'static> ConsumeOperator<M> {
    /// Create an operator with an explicit apply function
    ///
    /// Function names in `config` are ignored.
    pub fn new(config: &ConsumeConfig, apply: ApplyFunction<M>) -> Result<Self, ConsumeError> {
        config.validate()?;
        Ok(Self {
            topics: config.topics.clone(),
            plan: ConsumePlan::from_config(config)?,
            cadence: config.commit_cadence,
            apply,
        })
    }

    /// Create an operator, resolving the configured apply function by name
    pub fn from_config(
        config: &ConsumeConfig,
        registry: &FunctionRegistry<M>,
    ) -> Result<Self, ConsumeError> {
        config.validate()?;
        let apply = registry.resolve_config(config)?;
        Self::new(config, apply)
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn plan(&self) -> &ConsumePlan {
        &self.plan
    }

    pub fn commit_cadence(&self) -> CommitCadence {
        self.cadence
    }

    /// Consume from `source`, commit per the cadence, then close it
    ///
    /// A run that consumed nothing has no offsets to commit, so the
    /// end-of-run commit is skipped. Errors from the source, the apply
    /// function or a commit are returned as soon as they happen; the source
    /// is left open in that case.
    pub fn execute<S>(&mut self, source: &mut S) -> Result<ConsumeReport, ConsumeError>
    where
        S: MessageSource<Message = M> + ?Sized,
    {
        info!(
            "Consuming {:?} from {} (max_messages: {:?}, max_batch_size: {}, apply: {})",
            self.topics,
            source.name(),
            self.plan.max_messages(),
            self.plan.max_batch_size(),
            self.apply.mode()
        );

        let mut report = consume_batches(source, &self.plan, &mut self.apply, self.cadence)?;

        if !self.cadence.at_end() {
            debug!("commit cadence is {}, leaving offsets alone", self.cadence);
        } else if report.total_consumed == 0 {
            info!("Nothing consumed, skipping the {} commit", self.cadence);
        } else {
            info!("committing offset at {}", self.cadence);
            source.commit().map_err(ConsumeError::Commit)?;
            report.commits += 1;
        }

        if let Err(e) = source.close() {
            warn!("Failed to close {}: {}", source.name(), e);
            return Err(e.into());
        }

        report.finished_at = chrono::Utc::now();
        info!(
            "Consumed {} messages in {} batches ({} commits)",
            report.total_consumed, report.batches, report.commits
        );
        Ok(report)
    }
}
