//! Generic bucket processing.
//!
//! [`BulkComputation`] reads buckets of ids on `i1`, runs a [`BulkAction`]
//! over them in batches and emits one [`StatusDelta`] per bucket on `o1`.
//!
//! Per-bucket state machine, held in [`BucketCycle`]:
//!
//! ```text
//! Idle ──▶ Started ──▶ Processing ──▶ Done
//!             │             │
//!             └──────┬──────┘
//!                    ▼
//!                 Aborted
//! ```
//!
//! `Started → Aborted` is a configuration error: the bucket is skipped and
//! the command goes on. `Processing → Aborted` is a fatal error: the command
//! is remembered as aborted and its later buckets are acknowledged without
//! effect.

use std::collections::HashSet;
use std::sync::Arc;

use bulkstream_computation::{Computation, ComputationContext, ComputationError, ComputationMetadata};
use bulkstream_types::{
    Bucket, Command, CommandId, CommandState, CommandStatus, Record, StatusDelta, Watermark,
};

use crate::action::{BatchOutcome, BulkAction};
use crate::error::{BulkError, ConfigurationError};
use crate::scroll::ScrollProvider;
use crate::session::{SessionError, SessionFactory};
use crate::store::{CommandStore, StatusStore};

/// Shared collaborators handed to every bulk computation instance.
#[derive(Clone)]
pub struct Collaborators {
    pub commands: Arc<dyn CommandStore>,
    pub statuses: Arc<dyn StatusStore>,
    pub sessions: Arc<dyn SessionFactory>,
    pub scroll: Arc<dyn ScrollProvider>,
}

/// Where the current bucket stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BucketCycle {
    #[default]
    Idle,
    Started {
        command_id: CommandId,
        bucket_key: String,
    },
    Processing {
        command_id: CommandId,
        bucket_key: String,
        outcome: BatchOutcome,
    },
    Done {
        command_id: CommandId,
        bucket_key: String,
    },
    Aborted {
        command_id: CommandId,
        bucket_key: String,
        reason: String,
    },
}

impl BucketCycle {
    pub fn bucket_key(&self) -> Option<&str> {
        match self {
            BucketCycle::Idle => None,
            BucketCycle::Started { bucket_key, .. }
            | BucketCycle::Processing { bucket_key, .. }
            | BucketCycle::Done { bucket_key, .. }
            | BucketCycle::Aborted { bucket_key, .. } => Some(bucket_key),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, BucketCycle::Aborted { .. })
    }
}

pub struct BulkComputation<A: BulkAction> {
    metadata: ComputationMetadata,
    action: A,
    collaborators: Collaborators,
    cycle: BucketCycle,
    aborted: HashSet<CommandId>,
}

impl<A: BulkAction> BulkComputation<A> {
    pub fn new(name: impl Into<String>, action: A, collaborators: Collaborators) -> Self {
        Self {
            metadata: ComputationMetadata::new(name, 1, 1),
            action,
            collaborators,
            cycle: BucketCycle::Idle,
            aborted: HashSet::new(),
        }
    }

    pub fn cycle(&self) -> &BucketCycle {
        &self.cycle
    }

    pub fn is_aborted(&self, command_id: &CommandId) -> bool {
        self.aborted.contains(command_id)
    }

    /// Commands whose buckets must be acknowledged without processing.
    ///
    /// A command stays in the aborted set until its stored status is
    /// terminal; from then on the store answers for it.
    fn should_skip(&mut self, command_id: &CommandId) -> Result<bool, BulkError> {
        let status = self.collaborators.statuses.get(command_id)?;
        if status.as_ref().is_some_and(CommandStatus::is_terminal) {
            self.aborted.remove(command_id);
        } else if self.aborted.contains(command_id) {
            return Ok(true);
        }
        Ok(status.is_some_and(|s| s.state == CommandState::Failed))
    }

    /// Runs the bucket and returns the delta to emit.
    fn process_bucket(&mut self, command: &Command, bucket: &Bucket) -> Result<StatusDelta, BulkError> {
        let command_id = bucket.command_id().clone();
        let bucket_key = bucket.bucket_key().to_string();
        self.cycle = BucketCycle::Started {
            command_id: command_id.clone(),
            bucket_key: bucket_key.clone(),
        };

        if let Err(e) = self.action.start_bucket(command, &bucket_key) {
            return Ok(self.skip(bucket, e));
        }

        let mut session = match self
            .collaborators
            .sessions
            .open(command.repository(), command.principal())
        {
            Ok(session) => session,
            Err(SessionError::UnknownRepository(repository)) => {
                return Ok(self.skip(bucket, ConfigurationError::UnknownRepository(repository)));
            }
            Err(e) => return Err(e.into()),
        };

        self.cycle = BucketCycle::Processing {
            command_id: command_id.clone(),
            bucket_key: bucket_key.clone(),
            outcome: BatchOutcome::default(),
        };
        let mut outcome = BatchOutcome::default();
        let batch_size = command.batch_size().max(1) as usize;

        for batch in bucket.ids().chunks(batch_size) {
            match self.action.compute(session.as_mut(), batch, bucket.properties()) {
                Ok(batch_outcome) => {
                    session.save()?;
                    outcome.merge(batch_outcome);
                    if let BucketCycle::Processing { outcome: current, .. } = &mut self.cycle {
                        current.clone_from(&outcome);
                    }
                }
                Err(fatal) => {
                    // Records processed before the failure stay counted and saved.
                    if let Err(e) = session.save() {
                        tracing::warn!(command_id = %command_id, error = %e, "save after fatal error failed");
                    }
                    let processed = outcome.processed + fatal.processed;
                    tracing::error!(
                        command_id = %command_id,
                        bucket_key = %bucket_key,
                        processed,
                        error = %fatal,
                        "command aborted"
                    );
                    self.aborted.insert(command_id.clone());
                    self.cycle = BucketCycle::Aborted {
                        command_id: command_id.clone(),
                        bucket_key,
                        reason: fatal.message.clone(),
                    };
                    let errors = outcome.errors + fatal.ids.len().max(1) as u64;
                    let mut failed_ids = outcome.failed_ids;
                    failed_ids.extend(fatal.ids);
                    return Ok(StatusDelta::processed(command_id, processed)
                        .with_errors(errors, Some(fatal.message), failed_ids)
                        .into_fatal());
                }
            }
        }

        tracing::debug!(
            command_id = %command_id,
            bucket_key = %bucket_key,
            processed = outcome.processed,
            errors = outcome.errors,
            "bucket done"
        );
        self.cycle = BucketCycle::Done {
            command_id: command_id.clone(),
            bucket_key,
        };
        Ok(StatusDelta::processed(command_id, outcome.processed).with_errors(
            outcome.errors,
            outcome.error_message,
            outcome.failed_ids,
        ))
    }

    fn skip(&mut self, bucket: &Bucket, error: ConfigurationError) -> StatusDelta {
        tracing::warn!(
            command_id = %bucket.command_id(),
            bucket_key = %bucket.bucket_key(),
            ids = bucket.len(),
            error = %error,
            "bucket skipped"
        );
        self.cycle = BucketCycle::Aborted {
            command_id: bucket.command_id().clone(),
            bucket_key: bucket.bucket_key().to_string(),
            reason: error.to_string(),
        };
        StatusDelta::skipped(bucket.command_id().clone(), bucket.len() as u64, error.to_string())
    }
}

impl<A: BulkAction> Computation for BulkComputation<A> {
    fn metadata(&self) -> &ComputationMetadata {
        &self.metadata
    }

    fn process_record(
        &mut self,
        ctx: &mut ComputationContext,
        _input: &str,
        record: Record,
    ) -> Result<(), ComputationError> {
        let bucket = match Bucket::decode(record.data()) {
            Ok(bucket) => bucket,
            Err(e) => {
                tracing::warn!(computation = %self.metadata.name(), error = %e, "dropping undecodable bucket");
                ctx.ask_for_checkpoint();
                return Ok(());
            }
        };
        let command_id = bucket.command_id().clone();

        let Some(command) = self.collaborators.commands.get(&command_id).map_err(BulkError::from)? else {
            tracing::warn!(command_id = %command_id, bucket_key = %bucket.bucket_key(), "bucket of unknown command dropped");
            ctx.ask_for_checkpoint();
            return Ok(());
        };

        if self.should_skip(&command_id)? {
            tracing::debug!(command_id = %command_id, bucket_key = %bucket.bucket_key(), "command aborted, bucket ignored");
            ctx.ask_for_checkpoint();
            return Ok(());
        }

        let delta = self.process_bucket(&command, &bucket)?;
        let data = delta.encode().map_err(BulkError::from)?;
        ctx.produce_record(
            "o1",
            Record::new(
                command_id.as_str().to_string(),
                data,
                Watermark::of_timestamp(ctx.now_ms()),
            ),
        )?;
        ctx.ask_for_checkpoint();
        Ok(())
    }
}
