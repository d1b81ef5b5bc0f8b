//! Folding deltas into command status.

use std::sync::Arc;

use bulkstream_computation::{Computation, ComputationContext, ComputationError, ComputationMetadata};
use bulkstream_types::{CommandState, Record, StatusDelta, Watermark};

use crate::error::BulkError;
use crate::store::StatusStore;

/// Aggregates status deltas from `i1` into the [`StatusStore`] and emits the
/// final status on `o1` the first time a command turns terminal.
pub struct StatusComputation {
    metadata: ComputationMetadata,
    statuses: Arc<dyn StatusStore>,
}

impl StatusComputation {
    pub const NAME: &'static str = "bulk/status";

    pub fn new(statuses: Arc<dyn StatusStore>) -> Self {
        Self {
            metadata: ComputationMetadata::new(Self::NAME, 1, 1),
            statuses,
        }
    }

    fn apply(&self, ctx: &mut ComputationContext, delta: &StatusDelta) -> Result<(), ComputationError> {
        let Some(mut status) = self.statuses.get(&delta.command_id).map_err(BulkError::from)? else {
            tracing::warn!(command_id = %delta.command_id, "delta for unknown command dropped");
            return Ok(());
        };
        if status.is_terminal() {
            tracing::debug!(command_id = %delta.command_id, state = ?status.state, "delta after terminal state ignored");
            return Ok(());
        }

        let now_ms = ctx.now_ms();
        let finished = status.apply(delta, now_ms);
        if finished {
            match status.state {
                CommandState::Failed => tracing::error!(
                    command_id = %status.command_id,
                    processed = status.processed,
                    errors = status.errors,
                    error = status.error_message.as_deref().unwrap_or_default(),
                    "command failed"
                ),
                _ => tracing::info!(
                    command_id = %status.command_id,
                    processed = status.processed,
                    errors = status.errors,
                    skipped = status.skipped,
                    "command completed"
                ),
            }
            let data = status.encode().map_err(BulkError::from)?;
            ctx.produce_record(
                "o1",
                Record::new(
                    status.command_id.as_str().to_string(),
                    data,
                    Watermark::completed_of(Watermark::of_timestamp(now_ms)),
                ),
            )?;
        }
        self.statuses.put(status).map_err(BulkError::from)?;
        Ok(())
    }
}

impl Computation for StatusComputation {
    fn metadata(&self) -> &ComputationMetadata {
        &self.metadata
    }

    fn process_record(
        &mut self,
        ctx: &mut ComputationContext,
        _input: &str,
        record: Record,
    ) -> Result<(), ComputationError> {
        match StatusDelta::decode(record.data()) {
            Ok(delta) => self.apply(ctx, &delta)?,
            Err(e) => tracing::warn!(error = %e, "dropping undecodable status delta"),
        }
        ctx.ask_for_checkpoint();
        Ok(())
    }
}
