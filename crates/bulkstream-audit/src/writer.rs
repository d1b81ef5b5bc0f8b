use std::sync::Arc;

use bulkstream_computation::{
    BatchBuffer, Computation, ComputationContext, ComputationError, ComputationMetadata, FlushPolicy,
};
use bulkstream_types::Record;

use crate::backend::AuditBackend;
use crate::entry::LogEntry;

pub const DEFAULT_AUDIT_STREAM: &str = "audit";
pub const FLUSH_TIMER: &str = "flush";

/// Writes entries read on `i1` to an [`AuditBackend`] in batches.
pub struct AuditWriterComputation {
    metadata: ComputationMetadata,
    backend: Arc<dyn AuditBackend>,
    buffer: BatchBuffer<LogEntry>,
}

impl AuditWriterComputation {
    pub const NAME: &'static str = "audit/writer";

    pub fn new(backend: Arc<dyn AuditBackend>, policy: FlushPolicy) -> Self {
        Self {
            metadata: ComputationMetadata::new(Self::NAME, 1, 0),
            backend,
            buffer: BatchBuffer::new(policy, 0),
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Arms the flush timer for the end of the current window. An empty
    /// buffer waits a full threshold from now.
    fn arm(&self, ctx: &mut ComputationContext) {
        let when_ms = if self.buffer.is_empty() {
            ctx.now_ms() + self.buffer.policy().batch_threshold_ms
        } else {
            self.buffer.next_deadline()
        };
        ctx.set_timer(FLUSH_TIMER, when_ms);
    }

    fn flush(&mut self, ctx: &mut ComputationContext) -> Result<(), ComputationError> {
        let count = self.buffer.len();
        if let Err(e) = self.backend.add_entries(self.buffer.items()) {
            tracing::error!(entries = count, error = %e, "audit flush failed");
            return Err(ComputationError::other(e));
        }
        self.buffer.drain(ctx.now_ms());
        ctx.ask_for_checkpoint();
        tracing::debug!(entries = count, "audit entries flushed");
        Ok(())
    }
}

impl Computation for AuditWriterComputation {
    fn metadata(&self) -> &ComputationMetadata {
        &self.metadata
    }

    fn init(&mut self, ctx: &mut ComputationContext) -> Result<(), ComputationError> {
        self.buffer = BatchBuffer::new(self.buffer.policy(), ctx.now_ms());
        self.arm(ctx);
        Ok(())
    }

    fn process_record(
        &mut self,
        ctx: &mut ComputationContext,
        _input: &str,
        record: Record,
    ) -> Result<(), ComputationError> {
        match LogEntry::decode(record.data()) {
            Ok(entry) => self.buffer.push(entry),
            Err(e) => {
                tracing::warn!(key = record.key_str().unwrap_or_default(), error = %e, "dropping undecodable audit entry");
                return Ok(());
            }
        }
        if self.buffer.is_full() {
            self.flush(ctx)?;
        }
        Ok(())
    }

    fn process_timer(
        &mut self,
        ctx: &mut ComputationContext,
        name: &str,
        _timestamp_ms: u64,
    ) -> Result<(), ComputationError> {
        if name != FLUSH_TIMER {
            return Ok(());
        }
        if self.buffer.is_due(ctx.now_ms()) {
            self.flush(ctx)?;
        }
        self.arm(ctx);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let count = self.buffer.len();
        match self.backend.add_entries(self.buffer.items()) {
            Ok(()) => tracing::info!(entries = count, "audit buffer flushed on shutdown"),
            Err(e) => tracing::warn!(entries = count, error = %e, "audit buffer lost on shutdown"),
        }
    }
}
