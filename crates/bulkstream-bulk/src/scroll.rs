//! Turning a command into buckets of ids.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use bulkstream_computation::{Computation, ComputationContext, ComputationError, ComputationMetadata};
use bulkstream_types::{Bucket, Command, CommandId, CommandStatus, Record, StatusDelta, Watermark};

use crate::error::{BulkError, ConfigurationError};
use crate::store::StatusStore;
use crate::topology::{STATUS_STREAM, action_stream};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrollError {
    #[error("invalid query {0:?}")]
    InvalidQuery(String),

    #[error("scroll failed: {0}")]
    Failed(String),
}

/// Ids selected by a command's query, in query order.
pub type IdIterator = Box<dyn Iterator<Item = String> + Send>;

pub trait ScrollProvider: Send + Sync {
    fn scroll(&self, command: &Command) -> Result<IdIterator, ScrollError>;
}

/// Maps query strings to fixed id lists.
#[derive(Debug, Clone, Default)]
pub struct MemoryScrollProvider {
    results: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl MemoryScrollProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the ids returned for `query`.
    pub fn insert<I, S>(&self, query: impl Into<String>, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(query.into(), ids.into_iter().map(Into::into).collect());
    }
}

impl ScrollProvider for MemoryScrollProvider {
    fn scroll(&self, command: &Command) -> Result<IdIterator, ScrollError> {
        let results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        let ids = results
            .get(command.query())
            .cloned()
            .ok_or_else(|| ScrollError::InvalidQuery(command.query().to_string()))?;
        Ok(Box::new(ids.into_iter()))
    }
}

// ============================================================================
// BucketScroller
// ============================================================================

/// Chunks scrolled ids into buckets of the command's bucket size, stopping
/// at its query limit.
pub struct BucketScroller {
    command_id: CommandId,
    ids: IdIterator,
    bucket_size: usize,
    remaining: Option<u64>,
    sequence: u64,
    scrolled: u64,
}

impl BucketScroller {
    pub fn new(command: &Command, ids: IdIterator) -> Self {
        Self {
            command_id: command.id().clone(),
            ids,
            bucket_size: command.bucket_size().max(1) as usize,
            remaining: command.query_limit(),
            sequence: 0,
            scrolled: 0,
        }
    }

    pub fn next_bucket(&mut self) -> Option<Bucket> {
        let capacity = match self.remaining {
            Some(0) => return None,
            Some(remaining) => self.bucket_size.min(remaining as usize),
            None => self.bucket_size,
        };
        let ids: Vec<String> = self.ids.by_ref().take(capacity).collect();
        if ids.is_empty() {
            return None;
        }
        if let Some(remaining) = &mut self.remaining {
            *remaining -= ids.len() as u64;
        }
        self.scrolled += ids.len() as u64;
        let bucket = Bucket::new(self.command_id.clone(), self.sequence, ids);
        self.sequence += 1;
        Some(bucket)
    }

    /// Ids handed out so far.
    pub fn scrolled(&self) -> u64 {
        self.scrolled
    }
}

impl Iterator for BucketScroller {
    type Item = Bucket;

    fn next(&mut self) -> Option<Bucket> {
        self.next_bucket()
    }
}

// ============================================================================
// ScrollerComputation
// ============================================================================

/// Reads submitted commands and emits their buckets.
///
/// Outputs: `o1` is the status stream, then one `bulk/<action>` stream per
/// known action. Buckets of an action nobody serves are skipped with a
/// warning so the command still completes.
pub struct ScrollerComputation {
    metadata: ComputationMetadata,
    actions: BTreeSet<String>,
    scroll: Arc<dyn ScrollProvider>,
    statuses: Arc<dyn StatusStore>,
}

impl ScrollerComputation {
    pub const NAME: &'static str = "bulk/scroller";

    pub fn new(
        actions: BTreeSet<String>,
        scroll: Arc<dyn ScrollProvider>,
        statuses: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            metadata: ComputationMetadata::new(Self::NAME, 1, 1 + actions.len()),
            actions,
            scroll,
            statuses,
        }
    }

    /// Output bindings matching the metadata, status stream first.
    pub fn output_streams(actions: &BTreeSet<String>) -> Vec<String> {
        std::iter::once(STATUS_STREAM.to_string())
            .chain(actions.iter().map(|a| action_stream(a)))
            .collect()
    }

    fn emit_delta(ctx: &mut ComputationContext, delta: &StatusDelta) -> Result<(), ComputationError> {
        let data = delta.encode().map_err(BulkError::from)?;
        ctx.produce_record(
            "o1",
            Record::new(
                delta.command_id.as_str().to_string(),
                data,
                Watermark::of_timestamp(ctx.now_ms()),
            ),
        )
    }

    /// Moves the command to `SCROLLING`. Returns `false` when the command
    /// is already terminal and must not be scrolled again.
    fn mark_scrolling(&self, command: &Command) -> Result<bool, BulkError> {
        let mut status = self
            .statuses
            .get(command.id())?
            .unwrap_or_else(|| CommandStatus::scheduled(command));
        if status.is_terminal() {
            return Ok(false);
        }
        status.mark_scrolling();
        self.statuses.put(status)?;
        Ok(true)
    }
}

impl Computation for ScrollerComputation {
    fn metadata(&self) -> &ComputationMetadata {
        &self.metadata
    }

    fn process_record(
        &mut self,
        ctx: &mut ComputationContext,
        _input: &str,
        record: Record,
    ) -> Result<(), ComputationError> {
        let command = match Command::decode(record.data()) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable command");
                ctx.ask_for_checkpoint();
                return Ok(());
            }
        };
        let command_id = command.id().clone();
        if !self.mark_scrolling(&command)? {
            tracing::debug!(command_id = %command_id, "command already terminal, not scrolled");
            ctx.ask_for_checkpoint();
            return Ok(());
        }

        let ids = match self.scroll.scroll(&command) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(command_id = %command_id, error = %e, "scroll failed");
                let delta = StatusDelta::empty(command_id)
                    .with_errors(0, Some(e.to_string()), Vec::new())
                    .into_fatal();
                Self::emit_delta(ctx, &delta)?;
                ctx.ask_for_checkpoint();
                return Ok(());
            }
        };

        let served = self.actions.contains(command.action());
        let stream = action_stream(command.action());
        let mut scroller = BucketScroller::new(&command, ids);
        let mut buckets = 0u64;
        while let Some(bucket) = scroller.next_bucket() {
            if served {
                let data = bucket.encode().map_err(BulkError::from)?;
                let watermark = bucket_watermark(ctx.now_ms(), buckets);
                ctx.produce_record(&stream, Record::new(command_id.as_str().to_string(), data, watermark))?;
            } else {
                tracing::warn!(
                    command_id = %command_id,
                    action = %command.action(),
                    bucket_key = %bucket.bucket_key(),
                    "no computation for action, bucket skipped"
                );
                let error = ConfigurationError::UnknownAction(command.action().to_string());
                let delta = StatusDelta::skipped(command_id.clone(), bucket.len() as u64, error.to_string());
                Self::emit_delta(ctx, &delta)?;
            }
            buckets += 1;
        }

        tracing::info!(
            command_id = %command_id,
            action = %command.action(),
            buckets,
            total = scroller.scrolled(),
            "scroll done"
        );
        Self::emit_delta(ctx, &StatusDelta::scrolled(command_id, scroller.scrolled()))?;
        ctx.ask_for_checkpoint();
        Ok(())
    }
}

/// Watermark of the `index`th bucket of a scroll. Buckets past the last
/// sequence share it.
fn bucket_watermark(now_ms: u64, index: u64) -> Watermark {
    let sequence = u16::try_from(index)
        .unwrap_or(Watermark::MAX_SEQUENCE)
        .min(Watermark::MAX_SEQUENCE);
    Watermark::of_sequence(now_ms, sequence)
}
